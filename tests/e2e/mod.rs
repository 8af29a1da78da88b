pub mod guarded_service;

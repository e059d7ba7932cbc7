pub mod activity_log_repo;

pub use activity_log_repo::ActivityLogRepo;

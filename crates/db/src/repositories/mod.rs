pub mod queue_repo;

pub use queue_repo::QueueRepo;

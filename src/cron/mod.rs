mod scheduler;

pub use scheduler::CollectionScheduler;

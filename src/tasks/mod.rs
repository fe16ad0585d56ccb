mod cleanup;

pub use cleanup::CleanupScheduler;

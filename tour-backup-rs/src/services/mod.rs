pub mod cloud_sync;
pub mod dispatcher;
pub mod job_processor;
pub mod migration_engine;
pub mod part_builder;
pub mod part_uploader;
pub mod reaper;
pub mod worker_scheduler;

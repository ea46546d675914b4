pub mod backup_job;
pub mod backup_part;
pub mod backup_queue;
pub mod tour;

//! One module per operational workflow. Each exposes pure shaping functions
//! over [`Table`](crate::domain::model::Table) plus async entry points that
//! pull from the CRM, drive the browser or move files.

pub mod datashare;
pub mod ia_assignment;
pub mod partner_export;
pub mod programs;
pub mod section_creation;
pub mod student_upload;
pub mod tot_audit;
pub mod trackers;

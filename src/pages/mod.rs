//! Page objects for the CRM's custom forms. Each wraps a borrowed
//! [`BrowserSession`](crate::adapters::browser::BrowserSession).

pub mod indicator_area_form;
pub mod locators;
pub mod section_form;
pub mod student_upload;

pub use indicator_area_form::IndicatorAreaForm;
pub use section_form::SectionForm;
pub use student_upload::StudentUploadPage;

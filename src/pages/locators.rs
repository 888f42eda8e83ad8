//! Element locators for the CRM's custom pages. Ids follow the vendor's
//! generated form ids and change when a page layout is republished.

use crate::adapters::browser::By;

pub mod home {
    use super::By;

    /// Present on every page once the user is signed in.
    pub fn marker() -> By {
        By::id("tsidLabel")
    }
}

pub mod section_form {
    use super::By;

    pub const PATH: &str = "/apex/IM_AddStudentsToPrograms";

    pub fn school() -> By {
        By::id("j_id0:j_id1:school-selector")
    }

    pub fn program(program: &str) -> By {
        By::xpath(format!("//label[contains(text(), '{}')]", program))
    }

    pub fn proceed() -> By {
        By::xpath("//input[@value='Proceed']")
    }

    pub fn staff() -> By {
        By::id("j_id0:j_id1:staffID")
    }

    pub fn start_date() -> By {
        By::id("j_id0:j_id1:startDateID")
    }

    pub fn end_date() -> By {
        By::id("j_id0:j_id1:endDateID")
    }

    pub fn in_after_school() -> By {
        By::id("j_id0:j_id1:inAfterID")
    }

    pub fn save() -> By {
        By::css("input.black_btn:nth-child(2)")
    }

    /// Edit button on the saved section's detail page.
    pub fn saved_section() -> By {
        By::css("#topButtonRow > input:nth-child(3)")
    }

    pub fn nickname() -> By {
        By::id("00N1a000006Syte")
    }

    pub fn save_nickname() -> By {
        By::xpath("//input[@value=' Save ']")
    }
}

pub mod indicator_area {
    use super::By;

    pub const PATH: &str = "/apex/IM_Indicator_Areas";

    pub fn page_title() -> By {
        By::css("#schoolforce-wrapper > h1:nth-child(2)")
    }

    pub fn school() -> By {
        By::id("j_id0:j_id1:SchoolSelect")
    }

    pub fn grade() -> By {
        By::id("j_id0:j_id1:gradeList")
    }

    pub fn students_table() -> By {
        By::xpath("//table[@id='StudentsTable']")
    }

    pub fn student_row(student_id: &str) -> By {
        By::css(format!("tr[id ^= '{}'] td", student_id))
    }

    pub fn first_page() -> By {
        By::link_text("First")
    }

    pub fn next_page() -> By {
        By::link_text("Next")
    }

    pub fn add_to_ia() -> By {
        By::css(".drk_blue_btn")
    }

    /// Checkbox of an indicator area in the assignment modal.
    pub fn area(name: &str) -> Option<By> {
        let index = match name {
            "Attendance" => 0,
            "Behavior" => 1,
            "ELA/Literacy" => 2,
            "Math" => 3,
            _ => return None,
        };
        Some(By::id(format!("j_id0:j_id1:j_id124:{}", index)))
    }

    pub fn add_area() -> By {
        By::xpath("//input[@class='black_btn'][@value='Add']")
    }

    pub fn modal() -> By {
        By::xpath("//div[@id='studentModal'][@class='modal_window']")
    }

    pub fn save() -> By {
        By::xpath("//input[@class='black_btn'][@value='Save']")
    }

    pub fn success() -> By {
        By::xpath("//*[contains(text(), 'Your changes have been saved')]")
    }
}

pub mod student_upload {
    use super::By;

    pub fn loader_path(setup_id: &str) -> String {
        format!(
            "/apex/CT_core_LoadCsvData_v2?setupId={}&OldSideBar=true&type=Student",
            setup_id
        )
    }

    pub fn publish_path(setup_id: &str) -> String {
        format!("/apex/schoolsetup_staff?setupId={}", setup_id)
    }

    pub fn file_input() -> By {
        By::xpath("//*[@id=\"selectedFile\"]")
    }

    pub fn load_file() -> By {
        By::xpath("//*[@id=\"j_id0:j_id42\"]/div[3]/div[1]/div[6]/input[2]")
    }

    pub fn start_batch() -> By {
        By::xpath("//*[@id=\"startBatchButton\"]")
    }

    pub fn publish() -> By {
        By::css("input.red_btn")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_area_checkboxes_follow_form_order() {
        assert_eq!(
            indicator_area::area("Math"),
            Some(By::id("j_id0:j_id1:j_id124:3"))
        );
        assert_eq!(indicator_area::area("Reading"), None);
    }

    #[test]
    fn loader_path_carries_setup_id() {
        assert!(student_upload::loader_path("a0X1").contains("setupId=a0X1"));
    }
}

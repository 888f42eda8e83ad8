//! Program names as they appear on `Program__c.Name`.

pub const TUTORING_MATH: &str = "Tutoring: Math";
pub const TUTORING_LITERACY: &str = "Tutoring: Literacy";
pub const COACHING_ATTENDANCE: &str = "Coaching: Attendance";
pub const SEL_CHECK_IN: &str = "SEL Check In Check Out";
pub const HOMEWORK_ASSISTANCE: &str = "Homework Assistance";
pub const MATH_INVENTORY: &str = "Math Inventory";
pub const READING_INVENTORY: &str = "Reading Inventory";
pub const DESSA: &str = "DESSA";

/// Programs a section can be created for.
pub const SECTION_PROGRAMS: [&str; 8] = [
    TUTORING_MATH,
    TUTORING_LITERACY,
    COACHING_ATTENDANCE,
    SEL_CHECK_IN,
    HOMEWORK_ASSISTANCE,
    MATH_INVENTORY,
    READING_INVENTORY,
    DESSA,
];

/// Programs that get an indicator area, with the area they map to.
pub const INDICATOR_AREAS: [(&str, &str); 4] = [
    (COACHING_ATTENDANCE, "Attendance"),
    (SEL_CHECK_IN, "Behavior"),
    (TUTORING_MATH, "Math"),
    (TUTORING_LITERACY, "ELA/Literacy"),
];

pub fn is_tutoring(program: &str) -> bool {
    program.contains("Tutoring")
}

/// The tutoring program an inventory program accompanies.
pub fn inventory_counterpart(inventory: &str) -> Option<&'static str> {
    match inventory {
        MATH_INVENTORY => Some(TUTORING_MATH),
        READING_INVENTORY => Some(TUTORING_LITERACY),
        _ => None,
    }
}

pub fn indicator_area_for(program: &str) -> Option<&'static str> {
    INDICATOR_AREAS
        .iter()
        .find(|(p, _)| *p == program)
        .map(|(_, area)| *area)
}

pub fn program_for_indicator_area(area: &str) -> Option<&'static str> {
    INDICATOR_AREAS
        .iter()
        .find(|(_, a)| *a == area)
        .map(|(program, _)| *program)
}

use regex::RegexBuilder;
use uuid::Uuid;

use crate::shared::models::CopilotResponse;

/// Role+id tag shown instead of an employee name.
fn role_tag(employee_id: &Uuid) -> String {
    let id = employee_id.simple().to_string();
    format!("[operator-{}]", &id[..8])
}

fn mask_names(text: &str, employees: &[(Uuid, String)]) -> String {
    let mut masked = text.to_string();
    for (employee_id, name) in employees {
        if name.trim().is_empty() {
            continue;
        }
        let Ok(regex) = RegexBuilder::new(&regex::escape(name))
            .case_insensitive(true)
            .build()
        else {
            continue;
        };
        masked = regex
            .replace_all(&masked, role_tag(employee_id).as_str())
            .into_owned();
    }
    masked
}

/// Replace employee names with role+id tags in the user-visible text.
/// Applied after citation grounding so refs keep resolving; citations keep
/// their internal ids untouched.
pub fn redact_response(response: &mut CopilotResponse, employees: &[(Uuid, String)]) {
    if employees.is_empty() {
        return;
    }
    response.summary = mask_names(&response.summary, employees);
    for fact in &mut response.facts {
        fact.text = mask_names(&fact.text, employees);
    }
}

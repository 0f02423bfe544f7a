// Instruction Assembly
// Builds the prompt an ephemeral step agent receives. Section order is part
// of the contract: raw instruction, variables, previous step results,
// acceptance criteria. Empty sections are omitted.

use std::collections::{BTreeMap, HashMap};

use gatehouse_types::SkillStep;

pub fn compose_step_instruction(
    step: &SkillStep,
    vars: &BTreeMap<String, String>,
    results: &HashMap<String, String>,
) -> String {
    let mut sections = vec![step.instruction.trim().to_string()];

    if let Some(block) = variables_section(vars) {
        sections.push(block);
    }

    if !step.needs.is_empty() {
        let mut block = String::from("## Previous Step Results\n");
        for need in &step.needs {
            let output = results.get(need).map(String::as_str).unwrap_or("");
            block.push_str(&format!("\n### Step: {need}\n\n{output}\n"));
        }
        sections.push(block.trim_end().to_string());
    }

    if step.acceptance.has_criteria() {
        let mut block = String::from("## Acceptance Criteria\n");
        for criterion in &step.acceptance.criteria {
            block.push_str(&format!("\n- {criterion}"));
        }
        sections.push(block);
    }

    sections.join("\n\n")
}

pub fn compose_simple_instruction(
    instruction: &str,
    vars: &BTreeMap<String, String>,
) -> String {
    let mut sections = vec![instruction.trim().to_string()];
    if let Some(block) = variables_section(vars) {
        sections.push(block);
    }
    sections.join("\n\n")
}

fn variables_section(vars: &BTreeMap<String, String>) -> Option<String> {
    if vars.is_empty() {
        return None;
    }
    let mut block = String::from("## Variables\n");
    for (name, value) in vars {
        block.push_str(&format!("\n**{name}**: {value}"));
    }
    Some(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_types::Acceptance;

    fn step_with(needs: &[&str], criteria: &[&str]) -> SkillStep {
        SkillStep {
            id: "build".to_string(),
            title: "Build".to_string(),
            instruction: "Build the project.".to_string(),
            tools: Vec::new(),
            model: None,
            needs: needs.iter().map(ToString::to_string).collect(),
            acceptance: Acceptance {
                criteria: criteria.iter().map(ToString::to_string).collect(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let step = step_with(&["plan"], &["binary exists"]);
        let vars = BTreeMap::from([("target".to_string(), "release".to_string())]);
        let results = HashMap::from([("plan".to_string(), "use cargo".to_string())]);

        let text = compose_step_instruction(&step, &vars, &results);
        let instruction_at = text.find("Build the project.").unwrap();
        let vars_at = text.find("## Variables").unwrap();
        let results_at = text.find("## Previous Step Results").unwrap();
        let acceptance_at = text.find("## Acceptance Criteria").unwrap();
        assert!(instruction_at < vars_at);
        assert!(vars_at < results_at);
        assert!(results_at < acceptance_at);
        assert!(text.contains("**target**: release"));
        assert!(text.contains("### Step: plan\n\nuse cargo"));
        assert!(text.contains("- binary exists"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let step = step_with(&[], &[]);
        let text = compose_step_instruction(&step, &BTreeMap::new(), &HashMap::new());
        assert_eq!(text, "Build the project.");
        assert!(!text.contains("## Variables"));
        assert!(!text.contains("## Previous Step Results"));
        assert!(!text.contains("## Acceptance Criteria"));
    }

    #[test]
    fn needs_render_in_declared_order() {
        let mut step = step_with(&["second", "first"], &[]);
        step.needs = vec!["second".to_string(), "first".to_string()];
        let results = HashMap::from([
            ("first".to_string(), "one".to_string()),
            ("second".to_string(), "two".to_string()),
        ]);
        let text = compose_step_instruction(&step, &BTreeMap::new(), &results);
        let second_at = text.find("### Step: second").unwrap();
        let first_at = text.find("### Step: first").unwrap();
        assert!(second_at < first_at);
    }

    #[test]
    fn simple_instruction_includes_variables() {
        let vars = BTreeMap::from([("request".to_string(), "summarize inbox".to_string())]);
        let text = compose_simple_instruction("You are a helper.", &vars);
        assert!(text.starts_with("You are a helper."));
        assert!(text.contains("**request**: summarize inbox"));
    }
}

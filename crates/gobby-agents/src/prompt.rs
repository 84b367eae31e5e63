//! Task prompt construction for spawned agents.

use gobby_storage::models::Task;

/// Build the prompt handed to an agent working one task.
#[must_use]
pub fn build_task_prompt(task: &Task) -> String {
    let mut parts = vec![format!("# Task: {}", task.title), format!("Task ID: {}", task.id)];

    if let Some(description) = task.description.as_deref().filter(|d| !d.is_empty()) {
        parts.push(format!("\n## Description\n{description}"));
    }
    if let Some(category) = task.task_type.as_deref().filter(|c| !c.is_empty()) {
        parts.push(format!("\n## Category\n{category}"));
    }
    if let Some(criteria) = task
        .validation_criteria
        .as_deref()
        .filter(|c| !c.is_empty())
    {
        parts.push(format!("\n## Validation Criteria\n{criteria}"));
    }

    parts.push(format!(
        "\n## Instructions\n\
         1. Implement the task as described\n\
         2. Write tests if applicable\n\
         3. Commit your changes with the task ID in the message: [{}]\n\
         4. Close the task when complete using close_task(commit_sha=...)",
        task.id
    ));

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use gobby_storage::Database;
    use gobby_storage::projects::ProjectStore;
    use gobby_storage::tasks::{CreateTask, TaskStore};

    fn task(description: Option<&str>, category: Option<&str>, criteria: Option<&str>) -> Task {
        let db = Database::open_in_memory().unwrap();
        let projects = ProjectStore::new(db.clone());
        projects.ensure_reserved().unwrap();
        projects.create("proj", "proj", None).unwrap();
        TaskStore::new(db)
            .create(&CreateTask {
                project_id: "proj".into(),
                title: "Implement parser".into(),
                description: description.map(str::to_string),
                task_type: category.map(str::to_string),
                validation_criteria: criteria.map(str::to_string),
                ..CreateTask::default()
            })
            .unwrap()
    }

    #[test]
    fn test_prompt_includes_all_sections() {
        let task = task(Some("Parse the config"), Some("code"), Some("round-trips"));
        let prompt = build_task_prompt(&task);
        assert!(prompt.starts_with("# Task: Implement parser"));
        assert!(prompt.contains(&format!("Task ID: {}", task.id)));
        assert!(prompt.contains("## Description\nParse the config"));
        assert!(prompt.contains("## Category\ncode"));
        assert!(prompt.contains("## Validation Criteria\nround-trips"));
        assert!(prompt.contains(&format!("[{}]", task.id)));
        assert!(prompt.contains("close_task(commit_sha=...)"));
    }

    #[test]
    fn test_prompt_omits_empty_sections() {
        let task = task(None, None, None);
        let prompt = build_task_prompt(&task);
        assert!(!prompt.contains("## Description"));
        assert!(!prompt.contains("## Category"));
        assert!(!prompt.contains("## Validation Criteria"));
        assert!(prompt.contains("## Instructions"));
    }
}

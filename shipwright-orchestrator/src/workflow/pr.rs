//! Pull request text

use uuid::Uuid;

const MAX_TITLE_CHARS: usize = 72;

/// First non-blank line of the prompt, truncated to a reasonable title length
pub fn pr_title(prompt: &str) -> String {
    let line = prompt
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Automated changes");

    if line.chars().count() <= MAX_TITLE_CHARS {
        return line.to_string();
    }

    let mut title: String = line.chars().take(MAX_TITLE_CHARS - 3).collect();
    title.truncate(title.trim_end().len());
    title.push_str("...");
    title
}

/// Body embedding the prompt and, when any step failed, every accumulated error
pub fn pr_body(prompt: &str, job_id: Uuid, errors: &[String]) -> String {
    let mut body = format!("## Task\n\n{}\n\nJob: `{}`\n", prompt.trim(), job_id);

    if !errors.is_empty() {
        body.push_str(&format!(
            "\n## Failures\n\n{} step(s) did not succeed. Review carefully before merging.\n\n",
            errors.len()
        ));
        for error in errors {
            body.push_str("- ");
            body.push_str(error);
            body.push('\n');
        }
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_is_first_line() {
        assert_eq!(pr_title("\n  Fix login bug  \nDetails follow"), "Fix login bug");
        assert_eq!(pr_title("   "), "Automated changes");
    }

    #[test]
    fn test_long_title_is_truncated() {
        let title = pr_title(&"word ".repeat(40));
        assert!(title.chars().count() <= MAX_TITLE_CHARS);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_body_lists_every_error() {
        let errors = vec![
            "Setup step failed: a: `npm ci` exited with code 1".to_string(),
            "Build step failed: a: `make` exited with code 2".to_string(),
        ];
        let body = pr_body("Add a feature", Uuid::nil(), &errors);

        assert!(body.contains("Add a feature"));
        assert!(body.contains("2 step(s) did not succeed"));
        for error in &errors {
            assert!(body.contains(error.as_str()));
        }
    }

    #[test]
    fn test_clean_body_has_no_failure_section() {
        let body = pr_body("Add a feature", Uuid::nil(), &[]);
        assert!(!body.contains("Failures"));
    }
}

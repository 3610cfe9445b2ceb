//! Prompt construction for the model-facing states.

use crate::core::change::normalize_path;
use crate::ports::Message;

const CURATE_SYSTEM: &str = "You select the files a coding agent needs to read before \
working on a goal. Reply with one file path per line and nothing else.";

const PLAN_SYSTEM: &str = "You are a careful software engineer. Given a goal and the \
relevant files, write a short numbered plan of the edits required. Do not write code yet.";

const PROPOSAL_SYSTEM: &str = "You turn a plan into concrete file operations. For each file \
emit a header line `## CREATE: /path`, `## MODIFY: /path` or `## DELETE: /path`. CREATE and \
MODIFY headers are followed by a fenced code block holding the complete new file content. \
DELETE headers have no block. Emit nothing else.";

pub fn curate(goal: &str, candidates: &[String]) -> Vec<Message> {
    let listing = if candidates.is_empty() {
        "(no files yet)".to_string()
    } else {
        candidates.join("\n")
    };
    vec![
        Message::system(CURATE_SYSTEM),
        Message::user(format!("Goal:\n{}\n\nAvailable files:\n{}", goal, listing)),
    ]
}

pub fn plan(goal: &str, context_bundle: &str, feedback: Option<&str>) -> Vec<Message> {
    let mut prompt = format!("Goal:\n{}\n\nContext:\n{}", goal, context_bundle);
    if let Some(feedback) = feedback {
        prompt.push_str(&format!(
            "\n\nThe reviewer sent back the previous proposal with this feedback:\n{}",
            feedback
        ));
    }
    vec![Message::system(PLAN_SYSTEM), Message::user(prompt)]
}

pub fn proposal(goal: &str, plan: &str) -> Vec<Message> {
    vec![
        Message::system(PROPOSAL_SYSTEM),
        Message::user(format!("Goal:\n{}\n\nPlan:\n{}", goal, plan)),
    ]
}

/// Pick the listed candidates out of a curation reply.
///
/// Accepts bullets and backticks around paths. Unknown paths and duplicates
/// are dropped. Falls back to the first `max` candidates when nothing matched.
pub fn select_paths(reply: &str, candidates: &[String], max: usize) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for line in reply.lines() {
        let line = line
            .trim()
            .trim_start_matches(|c: char| c == '-' || c == '*' || c.is_ascii_digit() || c == '.')
            .trim();
        let Some(path) = normalize_path(line) else {
            continue;
        };
        if candidates.contains(&path) && !selected.contains(&path) {
            selected.push(path);
        }
        if selected.len() == max {
            break;
        }
    }

    if selected.is_empty() {
        candidates.iter().take(max).cloned().collect()
    } else {
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<String> {
        vec!["/src/lib.rs".to_string(), "/src/main.rs".to_string(), "/README.md".to_string()]
    }

    #[test]
    fn test_select_paths_keeps_known_in_reply_order() {
        let reply = "- `src/main.rs`\n* /src/lib.rs\n/unknown.rs\n/src/main.rs\n";
        assert_eq!(
            select_paths(reply, &candidates(), 10),
            vec!["/src/main.rs", "/src/lib.rs"]
        );
    }

    #[test]
    fn test_select_paths_falls_back_to_first_candidates() {
        assert_eq!(select_paths("nothing useful", &candidates(), 2), vec!["/src/lib.rs", "/src/main.rs"]);
    }

    #[test]
    fn test_select_paths_respects_max() {
        let reply = "/src/lib.rs\n/src/main.rs\n/README.md";
        assert_eq!(select_paths(reply, &candidates(), 1).len(), 1);
    }

    #[test]
    fn test_plan_includes_feedback() {
        let messages = plan("goal", "ctx", Some("smaller please"));
        assert!(messages[1].content.contains("smaller please"));
    }
}

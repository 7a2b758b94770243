use std::path::Path;

use tokio::fs;

use crate::error::AppResult;
use crate::models::TestDetail;
use crate::storage::QuizStorage;

/// Writes a plain-text dump of a test, overwriting `path`.
pub async fn export_test(storage: &QuizStorage, test_id: i64, path: &Path) -> AppResult<()> {
    let detail = storage.test_detail(test_id)?;
    tracing::info!("Writing export of test {} to {:?}", test_id, path);

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, render_export(&detail)).await?;

    tracing::info!("Export written successfully to {:?}", path);
    Ok(())
}

pub fn render_export(detail: &TestDetail) -> String {
    let test = &detail.test;
    let mut content = String::new();
    content.push_str(&format!("# Test #{}: {}\n", test.id, test.title));
    content.push_str(&format!("# Created: {}\n", test.created_at.to_rfc3339()));
    content.push_str(&format!("# Updated: {}\n", test.updated_at.to_rfc3339()));
    content.push_str(&format!(
        "# Status: {}\n",
        if test.is_active { "active" } else { "inactive" }
    ));
    content.push_str(&format!("# Total Questions: {}\n\n", detail.questions.len()));
    content.push_str(&format!("{}\n", test.description));

    for (index, question_detail) in detail.questions.iter().enumerate() {
        content.push_str(&format!(
            "\n{}. {}\n",
            index + 1,
            question_detail.question.text
        ));
        if question_detail.answers.is_empty() {
            content.push_str("    (no answers)\n");
        }
        for answer in &question_detail.answers {
            let marker = if answer.is_correct { "[x]" } else { "[ ]" };
            content.push_str(&format!("    {} {}\n", marker, answer.text));
        }
    }

    content
}

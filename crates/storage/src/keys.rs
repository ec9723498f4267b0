//! Object keys for task artifacts.
//!
//! Every task owns the prefix `{task_id}/`: the archive is
//! `{task_id}/{task_id}.zip` and previews are `{task_id}/{name}.svg`.

/// Names of the rendered previews, in upload order.
pub const RENDER_NAMES: [&str; 3] = ["front", "back", "schematic"];

pub fn is_render_name(name: &str) -> bool {
    RENDER_NAMES.contains(&name)
}

/// Task IDs are generated by the queue backend; anything outside this
/// alphabet cannot name a stored object.
pub fn is_valid_task_id(task_id: &str) -> bool {
    !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Download file name of a task's archive.
pub fn archive_name(task_id: &str) -> String {
    format!("{task_id}.zip")
}

pub fn archive_key(task_id: &str) -> String {
    format!("{task_id}/{}", archive_name(task_id))
}

pub fn render_key(task_id: &str, name: &str) -> String {
    format!("{task_id}/{name}.svg")
}

/// `Content-Disposition` value forcing a download under `file_name`.
pub fn attachment(file_name: &str) -> String {
    format!("attachment; filename=\"{file_name}\"")
}

//! Console rendering of client events

use dsvn_client::{Event, EventAction, EventHandler};
use dsvn_ra::Result;

/// Prints one line per event in the familiar `A    path` layout
#[derive(Debug, Default)]
pub struct PrintHandler;

impl PrintHandler {
    pub fn new() -> Self {
        Self
    }
}

/// Status column for an event, or `None` when it prints differently
fn status_letter(action: EventAction) -> Option<char> {
    match action {
        EventAction::UpdateAdd => Some('A'),
        EventAction::UpdateDelete => Some('D'),
        EventAction::UpdateUpdate => Some('U'),
        EventAction::Exists => Some('E'),
        EventAction::Conflicted => Some('C'),
        _ => None,
    }
}

pub fn render(event: &Event) -> Option<String> {
    let path = event.path.display();
    if let Some(letter) = status_letter(event.action) {
        return Some(format!("{}    {}", letter, path));
    }
    match event.action {
        EventAction::UpdateExternal => Some(format!("\nFetching external item into '{}':", path)),
        EventAction::FailedExternal => Some(format!(
            "Error handling externals definition for '{}': {}",
            path,
            event.error.as_deref().unwrap_or("unknown error")
        )),
        EventAction::ExternalLeftLocalMods => {
            Some(format!("Removed external left local modifications in '{}'", path))
        }
        EventAction::Skip => Some(format!("Skipped '{}'", path)),
        EventAction::UpdateCompleted if event.total_files > 0 => Some(format!(
            "Reported {} of {} files",
            event.reported_files, event.total_files
        )),
        _ => None,
    }
}

impl EventHandler for PrintHandler {
    fn handle_event(&self, event: &Event) -> Result<()> {
        if let Some(line) = render(event) {
            if event.action == EventAction::FailedExternal {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        }
        Ok(())
    }
}

//! Declarative menu model.
//!
//! The tray menu is computed here as plain data from the current state and
//! selections; `tray.rs` renders it. Nothing in this module touches a UI
//! toolkit, so the menu logic is unit-testable.

use crate::state::{AppState, Selections};

/// What clicking a menu entry means.
#[derive(Debug, Clone, PartialEq)]
pub enum MenuAction {
    ToggleListening,
    CancelRun,
    SelectModel(String),
    SelectLanguage(String),
    Quit,
}

/// One entry of the declarative menu.
#[derive(Debug, Clone, PartialEq)]
pub enum MenuEntry {
    /// Disabled informational line.
    Status(String),
    Action {
        label: String,
        action: MenuAction,
        enabled: bool,
    },
    /// Action with a checkmark (model/language selection).
    Checkable {
        label: String,
        action: MenuAction,
        checked: bool,
        enabled: bool,
    },
    Submenu {
        label: String,
        entries: Vec<MenuEntry>,
    },
    Separator,
}

/// Build the menu for the given state and selections.
pub fn build_menu_model(state: &AppState, selections: &Selections) -> Vec<MenuEntry> {
    let mut entries = vec![MenuEntry::Status(state.status_text()), MenuEntry::Separator];

    if state.has_toggle() {
        entries.push(MenuEntry::Action {
            label: state.toggle_label().to_string(),
            action: MenuAction::ToggleListening,
            enabled: true,
        });
    }
    if *state == AppState::Transcribing {
        entries.push(MenuEntry::Action {
            label: "Cancel Transcription".to_string(),
            action: MenuAction::CancelRun,
            enabled: true,
        });
    }
    if state.has_toggle() || *state == AppState::Transcribing {
        entries.push(MenuEntry::Separator);
    }

    entries.push(model_submenu(state, selections));
    entries.push(language_submenu(state, selections));
    entries.push(MenuEntry::Separator);

    entries.push(MenuEntry::Action {
        label: "Quit Murmur".to_string(),
        action: MenuAction::Quit,
        enabled: true,
    });

    entries
}

fn model_submenu(state: &AppState, selections: &Selections) -> MenuEntry {
    let entries = selections
        .models
        .iter()
        .map(|model| {
            let marker = if model.local { "" } else { " (download)" };
            MenuEntry::Checkable {
                label: format!("{}{marker}", model.name),
                action: MenuAction::SelectModel(model.name.clone()),
                checked: model.name == selections.model,
                enabled: state.can_switch_model() && !model.disabled,
            }
        })
        .collect();
    MenuEntry::Submenu {
        label: "Model".to_string(),
        entries,
    }
}

fn language_submenu(state: &AppState, selections: &Selections) -> MenuEntry {
    let entries = selections
        .languages
        .iter()
        .map(|language| MenuEntry::Checkable {
            label: language.clone(),
            action: MenuAction::SelectLanguage(language.clone()),
            checked: language.eq_ignore_ascii_case(&selections.language),
            enabled: !matches!(state, AppState::Disconnected),
        })
        .collect();
    MenuEntry::Submenu {
        label: "Language".to_string(),
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ModelChoice;

    fn selections() -> Selections {
        Selections {
            model: "base".to_string(),
            language: "auto".to_string(),
            models: vec![
                ModelChoice {
                    name: "tiny".to_string(),
                    local: true,
                    disabled: false,
                },
                ModelChoice {
                    name: "base".to_string(),
                    local: false,
                    disabled: false,
                },
                ModelChoice {
                    name: "large-v3".to_string(),
                    local: false,
                    disabled: true,
                },
            ],
            languages: vec!["auto".to_string(), "en".to_string(), "fr".to_string()],
        }
    }

    fn find_submenu<'a>(entries: &'a [MenuEntry], name: &str) -> &'a [MenuEntry] {
        entries
            .iter()
            .find_map(|e| match e {
                MenuEntry::Submenu { label, entries } if label == name => Some(&entries[..]),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no {name} submenu"))
    }

    #[test]
    fn test_status_line_first() {
        let entries = build_menu_model(&AppState::Ready, &selections());
        assert_eq!(entries[0], MenuEntry::Status("Ready".to_string()));
    }

    #[test]
    fn test_ready_state_offers_listen_toggle() {
        let entries = build_menu_model(&AppState::Ready, &selections());
        assert!(entries.iter().any(|e| matches!(
            e,
            MenuEntry::Action { label, action: MenuAction::ToggleListening, enabled: true }
                if label == "Start Listening"
        )));
    }

    #[test]
    fn test_transcribing_state_offers_cancel_not_toggle() {
        let entries = build_menu_model(&AppState::Transcribing, &selections());
        assert!(entries.iter().any(|e| matches!(
            e,
            MenuEntry::Action { action: MenuAction::CancelRun, .. }
        )));
        assert!(!entries.iter().any(|e| matches!(
            e,
            MenuEntry::Action { action: MenuAction::ToggleListening, .. }
        )));
    }

    #[test]
    fn test_model_submenu_checkmark_and_disabled() {
        let entries = build_menu_model(&AppState::Ready, &selections());
        let models = find_submenu(&entries, "Model");

        assert_eq!(models.len(), 3);
        assert!(matches!(
            &models[1],
            MenuEntry::Checkable { checked: true, .. }
        ));
        assert!(matches!(
            &models[0],
            MenuEntry::Checkable { checked: false, .. }
        ));
        // Disabled catalog entries can never be selected
        assert!(matches!(
            &models[2],
            MenuEntry::Checkable { enabled: false, .. }
        ));
    }

    #[test]
    fn test_remote_models_labelled_as_downloads() {
        let entries = build_menu_model(&AppState::Ready, &selections());
        let models = find_submenu(&entries, "Model");

        assert!(matches!(
            &models[0],
            MenuEntry::Checkable { label, .. } if label == "tiny"
        ));
        assert!(matches!(
            &models[1],
            MenuEntry::Checkable { label, .. } if label == "base (download)"
        ));
    }

    #[test]
    fn test_model_switching_locked_during_load() {
        let loading = AppState::Loading {
            phase: "Downloading".to_string(),
            percent: 10,
        };
        let entries = build_menu_model(&loading, &selections());
        let models = find_submenu(&entries, "Model");
        assert!(models.iter().all(|e| matches!(
            e,
            MenuEntry::Checkable { enabled: false, .. }
        )));
    }

    #[test]
    fn test_language_submenu_checkmark() {
        let entries = build_menu_model(&AppState::Ready, &selections());
        let languages = find_submenu(&entries, "Language");
        assert!(matches!(
            &languages[0],
            MenuEntry::Checkable { label, checked: true, .. } if label == "auto"
        ));
    }

    #[test]
    fn test_quit_always_last() {
        for state in [
            AppState::Disconnected,
            AppState::Ready,
            AppState::Listening,
            AppState::Transcribing,
        ] {
            let entries = build_menu_model(&state, &selections());
            assert!(matches!(
                entries.last().unwrap(),
                MenuEntry::Action { action: MenuAction::Quit, .. }
            ));
        }
    }
}

//! Renders the declarative menu model into tray-icon objects.

use tray_icon::menu::{
    CheckMenuItem, Menu, MenuId, MenuItem, PredefinedMenuItem, Submenu,
};
use tray_icon::{TrayIcon, TrayIconBuilder};

use crate::icons;
use crate::menu::{MenuAction, MenuEntry};
use crate::state::AppState;

/// A built menu plus the id → action table for event dispatch.
pub struct RenderedMenu {
    pub menu: Menu,
    pub actions: Vec<(MenuId, MenuAction)>,
}

/// Render a menu model.
pub fn render(entries: &[MenuEntry]) -> RenderedMenu {
    let menu = Menu::new();
    let mut actions = Vec::new();

    for entry in entries {
        append_entry(&menu, entry, &mut actions);
    }

    RenderedMenu { menu, actions }
}

fn append_entry(menu: &Menu, entry: &MenuEntry, actions: &mut Vec<(MenuId, MenuAction)>) {
    match entry {
        MenuEntry::Status(text) => {
            let item = MenuItem::new(text, false, None);
            menu.append(&item).expect("failed to build menu");
        }
        MenuEntry::Separator => {
            menu.append(&PredefinedMenuItem::separator())
                .expect("failed to build menu");
        }
        MenuEntry::Action {
            label,
            action,
            enabled,
        } => {
            let item = MenuItem::new(label, *enabled, None);
            actions.push((item.id().clone(), action.clone()));
            menu.append(&item).expect("failed to build menu");
        }
        MenuEntry::Checkable { .. } => {
            // Checkables only appear inside submenus
            debug_assert!(false, "checkable at menu top level");
        }
        MenuEntry::Submenu { label, entries } => {
            let submenu = Submenu::new(label, true);
            for child in entries {
                append_child(&submenu, child, actions);
            }
            menu.append(&submenu).expect("failed to build menu");
        }
    }
}

fn append_child(submenu: &Submenu, entry: &MenuEntry, actions: &mut Vec<(MenuId, MenuAction)>) {
    match entry {
        MenuEntry::Checkable {
            label,
            action,
            checked,
            enabled,
        } => {
            let item = CheckMenuItem::new(label, *enabled, *checked, None);
            actions.push((item.id().clone(), action.clone()));
            submenu.append(&item).expect("failed to build menu");
        }
        MenuEntry::Action {
            label,
            action,
            enabled,
        } => {
            let item = MenuItem::new(label, *enabled, None);
            actions.push((item.id().clone(), action.clone()));
            submenu.append(&item).expect("failed to build menu");
        }
        MenuEntry::Status(text) => {
            let item = MenuItem::new(text, false, None);
            submenu.append(&item).expect("failed to build menu");
        }
        MenuEntry::Separator => {
            submenu
                .append(&PredefinedMenuItem::separator())
                .expect("failed to build menu");
        }
        MenuEntry::Submenu { .. } => {
            debug_assert!(false, "nested submenus are not used");
        }
    }
}

/// Create the tray icon with the given state and menu.
pub fn create_tray_icon(state: &AppState, menu: Menu) -> TrayIcon {
    let builder = TrayIconBuilder::new()
        .with_menu(Box::new(menu))
        .with_tooltip("Murmur")
        .with_icon(icon_for_state(state))
        .with_menu_on_left_click(true);

    #[cfg(target_os = "macos")]
    let builder = builder.with_icon_as_template(false);

    builder.build().expect("failed to create tray icon")
}

/// Select the icon tint for the given state.
pub fn icon_for_state(state: &AppState) -> tray_icon::Icon {
    icons::waveform_icon(match state {
        AppState::Listening => [52, 199, 89, 255],
        AppState::Transcribing => [10, 132, 255, 255],
        AppState::Loading { .. } => [255, 204, 0, 255],
        AppState::Ready | AppState::Unloaded => [190, 190, 190, 255],
        AppState::Disconnected | AppState::Error(_) => [255, 69, 58, 255],
    })
}

mod bridge;
mod icons;
mod menu;
mod state;
mod tray;

use std::sync::mpsc;

use tao::event::Event;
use tao::event_loop::{ControlFlow, EventLoopBuilder};
use tray_icon::TrayIconEvent;
use tray_icon::menu::MenuEvent;
use tray_icon::menu::MenuId;

use bridge::{AppEvent, Command, UserEvent};
use menu::{MenuAction, build_menu_model};
use state::{AppState, Selections};

struct App {
    current_state: AppState,
    selections: Selections,
    tray_icon: Option<tray_icon::TrayIcon>,
    actions: Vec<(MenuId, MenuAction)>,
    cmd_tx: mpsc::Sender<Command>,
    shutting_down: bool,
}

impl App {
    fn new(cmd_tx: mpsc::Sender<Command>) -> Self {
        Self {
            current_state: AppState::Disconnected,
            selections: Selections::default(),
            tray_icon: None,
            actions: Vec::new(),
            cmd_tx,
            shutting_down: false,
        }
    }

    fn handle_event(&mut self, event: Event<UserEvent>) -> ControlFlow {
        match event {
            Event::NewEvents(tao::event::StartCause::Init) => self.handle_init(),
            Event::UserEvent(UserEvent::Menu(event)) => self.handle_menu_event(event),
            Event::UserEvent(UserEvent::App(app_event)) => {
                return self.handle_app_event(app_event);
            }
            _ => {}
        }
        ControlFlow::Wait
    }

    fn handle_init(&mut self) {
        let rendered = tray::render(&build_menu_model(&self.current_state, &self.selections));
        self.actions = rendered.actions;
        self.tray_icon = Some(tray::create_tray_icon(&self.current_state, rendered.menu));

        #[cfg(target_os = "macos")]
        {
            use objc2_core_foundation::CFRunLoop;
            let rl = CFRunLoop::main().unwrap();
            rl.wake_up();
        }
    }

    fn find_action(&self, event: &MenuEvent) -> Option<MenuAction> {
        self.actions
            .iter()
            .find(|(id, _)| event.id == *id)
            .map(|(_, action)| action.clone())
    }

    fn handle_menu_event(&mut self, event: MenuEvent) {
        match self.find_action(&event) {
            Some(MenuAction::Quit) => {
                if !self.shutting_down {
                    self.shutting_down = true;
                    let _ = self.cmd_tx.send(Command::Shutdown);
                }
            }
            Some(MenuAction::ToggleListening) => {
                let _ = self.cmd_tx.send(Command::ToggleListening);
            }
            Some(MenuAction::CancelRun) => {
                let _ = self.cmd_tx.send(Command::CancelRun);
            }
            Some(MenuAction::SelectModel(model)) => {
                let _ = self.cmd_tx.send(Command::SelectModel(model.clone()));
                // Keep local state in sync so rebuilds before the daemon
                // confirms don't revert the checkmark
                self.selections.model = model;
                self.rebuild_menu();
            }
            Some(MenuAction::SelectLanguage(language)) => {
                let _ = self.cmd_tx.send(Command::SelectLanguage(language.clone()));
                self.selections.language = language;
                self.rebuild_menu();
            }
            None => {}
        }
    }

    fn handle_app_event(&mut self, event: AppEvent) -> ControlFlow {
        match event {
            AppEvent::ShutdownComplete => {
                self.tray_icon.take();
                return ControlFlow::Exit;
            }
            AppEvent::StateChanged(new_state) => {
                self.current_state = new_state;
                self.rebuild_menu();
            }
            AppEvent::SelectionsChanged(selections) => {
                self.selections = selections;
                self.rebuild_menu();
            }
        }
        ControlFlow::Wait
    }

    fn rebuild_menu(&mut self) {
        if let Some(ref tray_icon) = self.tray_icon {
            let rendered = tray::render(&build_menu_model(&self.current_state, &self.selections));
            self.actions = rendered.actions;
            tray_icon.set_menu(Some(Box::new(rendered.menu)));
            tray_icon
                .set_icon(Some(tray::icon_for_state(&self.current_state)))
                .expect("failed to set icon");
        }
    }
}

/// Run the menu-bar application. Blocks until quit.
pub fn run() {
    let mut event_loop = EventLoopBuilder::<UserEvent>::with_user_event().build();

    // Hide from Dock; must be set before run(), tao applies it during launch
    #[cfg(target_os = "macos")]
    {
        use tao::platform::macos::{ActivationPolicy, EventLoopExtMacOS};
        event_loop.set_activation_policy(ActivationPolicy::Accessory);
    }

    // Forward tray/menu events into the tao event loop
    let proxy = event_loop.create_proxy();
    TrayIconEvent::set_event_handler(Some(move |event| {
        let _ = proxy.send_event(UserEvent::TrayIcon(event));
    }));
    let proxy = event_loop.create_proxy();
    MenuEvent::set_event_handler(Some(move |event| {
        let _ = proxy.send_event(UserEvent::Menu(event));
    }));

    // Spawn async runtime on background thread
    let cmd_tx = bridge::spawn_async_runtime(event_loop.create_proxy());

    let mut app = App::new(cmd_tx);

    event_loop.run(move |event, _, control_flow| {
        *control_flow = app.handle_event(event);
    });
}

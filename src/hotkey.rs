// hotkey.rs - System-wide trigger key and middle-button listener.
//
// The OS hook runs on its own thread (rdev::listen blocks forever) and hands
// actions to the async dispatcher over an unbounded channel. If the hook
// cannot be installed the channel closes and the stdin commands keep working.

use rdev::{Button, EventType, Key};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::dispatcher::TriggerAction;
use crate::settings::TriggerSettings;

#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("unknown trigger key '{0}'")]
    UnknownKey(String),
}

/// The configured trigger key.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerKey {
    /// Matched against the character the key press produced.
    Char(String),
    /// A key without a character, matched by key code.
    Named(Key),
}

impl TriggerKey {
    pub fn parse(spec: &str) -> Result<Self, HotkeyError> {
        let spec = spec.trim();
        if spec.chars().count() == 1 {
            return Ok(TriggerKey::Char(spec.to_string()));
        }
        named_key(&spec.to_lowercase())
            .map(TriggerKey::Named)
            .ok_or_else(|| HotkeyError::UnknownKey(spec.to_string()))
    }

    fn matches(&self, key: Key, name: Option<&str>) -> bool {
        match self {
            TriggerKey::Char(c) => name == Some(c.as_str()),
            TriggerKey::Named(k) => *k == key,
        }
    }
}

fn named_key(name: &str) -> Option<Key> {
    let key = match name {
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        "space" => Key::Space,
        "enter" | "return" => Key::Return,
        "esc" | "escape" => Key::Escape,
        "tab" => Key::Tab,
        "backspace" => Key::Backspace,
        "insert" => Key::Insert,
        "delete" => Key::Delete,
        "home" => Key::Home,
        "end" => Key::End,
        "page_up" => Key::PageUp,
        "page_down" => Key::PageDown,
        "pause" => Key::Pause,
        "print_screen" => Key::PrintScreen,
        "scroll_lock" => Key::ScrollLock,
        "caps_lock" => Key::CapsLock,
        "backslash" => Key::BackSlash,
        _ => return None,
    };
    Some(key)
}

/// Maps raw input events to trigger actions.
#[derive(Debug, Clone)]
pub struct GlobalTrigger {
    key: Option<TriggerKey>,
    middle_button: bool,
}

impl GlobalTrigger {
    pub fn from_settings(settings: &TriggerSettings) -> Result<Self, HotkeyError> {
        let key = if settings.key.trim().is_empty() {
            None
        } else {
            Some(TriggerKey::parse(&settings.key)?)
        };
        Ok(Self {
            key,
            middle_button: settings.middle_button,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some() || self.middle_button
    }

    /// `name` is the character the event produced, if any.
    pub fn action_for(&self, event: &EventType, name: Option<&str>) -> Option<TriggerAction> {
        match event {
            EventType::KeyPress(key) => self
                .key
                .as_ref()
                .filter(|trigger| trigger.matches(*key, name))
                .map(|_| TriggerAction::Analyze),
            EventType::ButtonPress(Button::Middle) if self.middle_button => {
                Some(TriggerAction::Analyze)
            }
            _ => None,
        }
    }

    /// Install the OS hook on a background thread. `None` when nothing is
    /// configured or the thread cannot start.
    pub fn spawn(self) -> Option<UnboundedReceiver<TriggerAction>> {
        if !self.is_enabled() {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        log::info!(
            "Global trigger: key {:?}, middle button {}",
            self.key,
            self.middle_button
        );
        let spawned = std::thread::Builder::new()
            .name("global-trigger".into())
            .spawn(move || {
                let result = rdev::listen(move |event| {
                    if let Some(action) = self.action_for(&event.event_type, event.name.as_deref()) {
                        log::info!("Global trigger matched: {:?}", event.event_type);
                        // Receiver gone means the dispatcher stopped.
                        let _ = tx.send(action);
                    }
                });
                if let Err(e) = result {
                    log::error!("Global input hook failed: {:?}; use stdin commands instead", e);
                }
            });
        match spawned {
            Ok(_) => Some(rx),
            Err(e) => {
                log::error!("Cannot start global trigger thread: {}", e);
                None
            }
        }
    }
}

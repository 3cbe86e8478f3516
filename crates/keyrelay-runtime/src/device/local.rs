//! Local keyboard injector.
//!
//! Types commands on the host itself through a [`KeyInjector`]. There is
//! no real flow-control signal, so typing speed is bounded by a fixed
//! per-character delay instead.
//!
//! # Command Grammar
//!
//! | Command | Effect |
//! |---------|--------|
//! | `key:ENTER` | one named key, or one character |
//! | `text:Hello` | types the characters |
//! | `line:Hello` | types the characters, then Enter |
//! | `combo:CTRL+ALT+DELETE` | modifiers held while the last key is pressed |
//! | `delay:250` | waits 250 ms |
//! | anything else | typed as text |
//!
//! Characters the layout cannot produce are skipped with a warning.
//!
//! Pause and resume only toggle a status flag: holding commands back is
//! the processor's job, and a typing run already in progress finishes.

use super::{DeviceError, DeviceKind, KeyLayout, KeyStroke, Modifiers, OutputCommand, OutputDevice};
use async_trait::async_trait;
use keyrelay_event::{split_command, EventEmitter, EventType};
use keyrelay_types::SourceActor;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

/// Synthesizes key presses on the host.
pub trait KeyInjector: Send {
    /// Presses and releases one key with the given modifiers held.
    fn press(&mut self, stroke: &KeyStroke) -> Result<(), DeviceError>;
}

/// Builds a fresh injector; called at construction and on every reset.
pub type InjectorFactory = Arc<dyn Fn() -> Box<dyn KeyInjector> + Send + Sync>;

/// Injector that only writes each stroke to the trace log.
#[derive(Debug, Default)]
pub struct TracingInjector;

impl KeyInjector for TracingInjector {
    fn press(&mut self, stroke: &KeyStroke) -> Result<(), DeviceError> {
        trace!(stroke = %stroke, "key press");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Action {
    Press(KeyStroke),
    Wait(Duration),
}

/// [`OutputDevice`] that types on the local host.
pub struct LocalKeyboard {
    layout: KeyLayout,
    char_delay: Duration,
    factory: InjectorFactory,
    injector: Mutex<Box<dyn KeyInjector>>,
    emitter: Option<EventEmitter>,
    paused: AtomicBool,
    /// Bumped by every stop; a typing run aborts when it changes.
    stop_epoch: AtomicU64,
    cancelled: Notify,
    closed: AtomicBool,
}

impl LocalKeyboard {
    /// Creates a keyboard backed by [`TracingInjector`].
    #[must_use]
    pub fn new(layout: KeyLayout, char_delay: Duration) -> Self {
        let factory: InjectorFactory = Arc::new(|| Box::new(TracingInjector));
        let injector = factory();
        Self {
            layout,
            char_delay,
            factory,
            injector: Mutex::new(injector),
            emitter: None,
            paused: AtomicBool::new(false),
            stop_epoch: AtomicU64::new(0),
            cancelled: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Replaces the injector backend.
    #[must_use]
    pub fn with_injector_factory(mut self, factory: InjectorFactory) -> Self {
        self.injector = Mutex::new(factory());
        self.factory = factory;
        self
    }

    /// Publishes `DEVICE_DATA_SENT` for every typed command.
    #[must_use]
    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    #[must_use]
    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Status only; `send` still types while paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn plan(&self, text: &str) -> Result<Vec<Action>, DeviceError> {
        let Some((prefix, payload)) = split_command(text) else {
            return Ok(self.type_text(text));
        };

        match prefix.as_str() {
            "key" => self
                .layout
                .resolve_key(payload)
                .map(|stroke| vec![Action::Press(stroke)])
                .ok_or_else(|| DeviceError::InvalidCommand(text.to_string())),
            "text" => Ok(self.type_text(payload)),
            "line" => {
                let mut actions = self.type_text(payload);
                actions.push(Action::Press(KeyStroke::plain("enter")));
                Ok(actions)
            }
            "combo" => self.combo(payload).map(|stroke| vec![Action::Press(stroke)]),
            "delay" => payload
                .trim()
                .parse::<u64>()
                .map(|ms| vec![Action::Wait(Duration::from_millis(ms))])
                .map_err(|_| DeviceError::InvalidCommand(text.to_string())),
            _ => Ok(self.type_text(text)),
        }
    }

    fn type_text(&self, text: &str) -> Vec<Action> {
        text.chars()
            .filter_map(|c| match self.layout.stroke_for(c) {
                Some(stroke) => Some(Action::Press(stroke)),
                None => {
                    warn!(layout = self.layout.name(), ch = ?c, "no key for character, skipping");
                    None
                }
            })
            .collect()
    }

    fn combo(&self, payload: &str) -> Result<KeyStroke, DeviceError> {
        let invalid = || DeviceError::InvalidCommand(format!("combo:{payload}"));
        let parts: Vec<&str> = payload.split('+').map(str::trim).collect();
        let (key, mods) = parts.split_last().ok_or_else(invalid)?;

        let mut modifiers = Modifiers::empty();
        for name in mods {
            modifiers |= Modifiers::parse_combo_name(name).ok_or_else(invalid)?;
        }
        let stroke = self.layout.resolve_key(key).ok_or_else(invalid)?;
        Ok(KeyStroke::new(stroke.key, stroke.modifiers | modifiers))
    }

    fn check_run(&self, epoch: u64) -> Result<(), DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        if self.stop_epoch.load(Ordering::SeqCst) != epoch {
            return Err(DeviceError::Cancelled);
        }
        Ok(())
    }

    /// Sleeps, waking early when a stop or shutdown arrives.
    async fn pause_for(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.cancelled.notified() => {}
        }
    }

    async fn run(&self, actions: &[Action], epoch: u64) -> Result<(), DeviceError> {
        for action in actions {
            self.check_run(epoch)?;
            match action {
                Action::Press(stroke) => {
                    self.injector.lock().press(stroke)?;
                    self.pause_for(self.char_delay).await;
                }
                Action::Wait(duration) => self.pause_for(*duration).await,
            }
        }
        self.check_run(epoch)
    }
}

impl std::fmt::Debug for LocalKeyboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyboard")
            .field("layout", &self.layout.name())
            .field("char_delay", &self.char_delay)
            .field("paused", &self.is_paused())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl OutputDevice for LocalKeyboard {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Local
    }

    fn supports_reset(&self) -> bool {
        true
    }

    async fn send(&self, commands: &[OutputCommand]) -> Result<(), DeviceError> {
        let epoch = self.stop_epoch.load(Ordering::SeqCst);
        for command in commands {
            let actions = self.plan(&command.text)?;
            debug!(command = %command.text, strokes = actions.len(), "typing");
            self.run(&actions, epoch).await?;

            if let (Some(emitter), Some(parent)) = (&self.emitter, &command.parent) {
                emitter.emit(
                    SourceActor::Device,
                    parent,
                    EventType::DeviceDataSent,
                    Some(command.text.clone()),
                );
            }
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), DeviceError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_and_clear(&self) -> Result<(), DeviceError> {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        self.cancelled.notify_waiters();
        debug!("local keyboard stopped");
        Ok(())
    }

    async fn resume(&self) -> Result<(), DeviceError> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        *self.injector.lock() = (self.factory)();
        info!(layout = self.layout.name(), "local injector recreated");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DeviceError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancelled.notify_waiters();
        info!("local keyboard shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingInjector;

    fn keyboard() -> (LocalKeyboard, RecordingInjector) {
        let recorder = RecordingInjector::new();
        let kb = LocalKeyboard::new(KeyLayout::us(), Duration::ZERO)
            .with_injector_factory(recorder.factory());
        (kb, recorder)
    }

    fn cmd(text: &str) -> OutputCommand {
        OutputCommand::new(text, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn line_types_text_then_enter() {
        let (kb, rec) = keyboard();
        kb.send(&[cmd("line:Hi")]).await.unwrap();
        assert_eq!(
            rec.strokes(),
            vec![
                KeyStroke::new("h", Modifiers::SHIFT),
                KeyStroke::plain("i"),
                KeyStroke::plain("enter"),
            ]
        );
    }

    #[tokio::test]
    async fn combo_merges_modifiers() {
        let (kb, rec) = keyboard();
        kb.send(&[cmd("combo:CTRL+ALT+DELETE")]).await.unwrap();
        assert_eq!(
            rec.strokes(),
            vec![KeyStroke::new("delete", Modifiers::CTRL | Modifiers::ALT)]
        );
    }

    #[tokio::test]
    async fn bare_text_is_typed() {
        let (kb, rec) = keyboard();
        kb.send(&[cmd("ok")]).await.unwrap();
        assert_eq!(rec.keys(), vec!["o", "k"]);
    }

    #[tokio::test]
    async fn pause_is_a_status_flag() {
        let (kb, rec) = keyboard();
        kb.pause().await.unwrap();
        assert!(kb.is_paused());
        kb.send(&[cmd("key:A")]).await.unwrap();
        assert_eq!(rec.keys(), vec!["a"]);

        kb.resume().await.unwrap();
        assert!(!kb.is_paused());
    }

    #[tokio::test]
    async fn unknown_key_is_invalid() {
        let (kb, rec) = keyboard();
        let err = kb.send(&[cmd("key:HYPER")]).await.unwrap_err();
        assert!(matches!(err, DeviceError::InvalidCommand(_)));
        assert!(rec.strokes().is_empty());
    }

    #[tokio::test]
    async fn bad_delay_is_invalid() {
        let (kb, _rec) = keyboard();
        assert!(matches!(
            kb.send(&[cmd("delay:soon")]).await,
            Err(DeviceError::InvalidCommand(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_typing_between_strokes() {
        let recorder = RecordingInjector::new();
        let kb = Arc::new(
            LocalKeyboard::new(KeyLayout::us(), Duration::from_millis(100))
                .with_injector_factory(recorder.factory()),
        );

        let typing = {
            let kb = Arc::clone(&kb);
            tokio::spawn(async move { kb.send(&[cmd("text:abcdef")]).await })
        };
        tokio::time::sleep(Duration::from_millis(250)).await;
        kb.stop_and_clear().await.unwrap();

        let result = typing.await.unwrap();
        assert!(matches!(result, Err(DeviceError::Cancelled)));
        assert!(recorder.strokes().len() < 6);
    }

    #[tokio::test]
    async fn reset_recreates_injector() {
        let (kb, rec) = keyboard();
        assert_eq!(rec.created(), 1);
        kb.reset().await.unwrap();
        assert_eq!(rec.created(), 2);
        assert!(kb.supports_reset());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_closes() {
        let (kb, _rec) = keyboard();
        kb.shutdown().await.unwrap();
        kb.shutdown().await.unwrap();
        assert!(matches!(kb.send(&[cmd("key:A")]).await, Err(DeviceError::Closed)));
        assert!(matches!(kb.reset().await, Err(DeviceError::Closed)));
    }

    #[tokio::test]
    async fn typed_commands_publish_data_sent() {
        let emitter = EventEmitter::new(8);
        let mut rx = emitter.subscribe();
        let (kb, _rec) = keyboard();
        let kb = kb.with_emitter(emitter.clone());

        let ctx = emitter.new_root_context(
            SourceActor::Gui,
            keyrelay_event::CommandKind::Key,
            None,
        );
        let command = cmd("key:ENTER").with_parent(ctx.clone().into());
        kb.send(&[command]).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventType::DeviceDataSent);
        assert_eq!(event.parent_id, ctx.id());
    }
}

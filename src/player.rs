use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::Value;
use tracing::debug;

use crate::document::{self, AnimationDocument, AnimationMeta, Rgb};
use crate::error_codes::StudioError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Ready,
    DataFailed(String),
}

pub type PlayerListener = Box<dyn FnMut(&PlayerEvent) + Send>;

/// A rasterized frame in tightly packed, non-premultiplied RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbaFrame {
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixel_count = width as usize * height as usize;
        Self {
            width,
            height,
            pixels: rgba.repeat(pixel_count),
        }
    }

    /// True when every pixel has the same value.
    pub fn is_blank(&self) -> bool {
        let mut pixels = self.pixels.chunks_exact(4);
        let Some(first) = pixels.next() else {
            return true;
        };
        pixels.all(|pixel| pixel == first)
    }
}

/// Adapter over the vector-animation renderer.
///
/// Frames are Lottie frame numbers (`ip..op`), not sample indices.
pub trait AnimationPlayer {
    fn load(&mut self, document: &AnimationDocument) -> Result<()>;
    fn subscribe(&mut self, listener: PlayerListener);
    fn is_loaded(&self) -> bool;
    fn play(&mut self);
    fn pause(&mut self);
    fn is_playing(&self) -> bool;
    /// Moves the playhead and stops playback.
    fn seek(&mut self, frame: f64) -> Result<()>;
    fn tick(&mut self, elapsed: Duration);
    fn current_frame(&self) -> f64;
    fn set_text(&mut self, layer_index: usize, text: &str) -> Result<()>;
    fn set_fill_color(&mut self, layer_index: usize, color: Rgb) -> Result<()>;
    fn rasterize(&mut self, width: u32, height: u32) -> Result<RgbaFrame>;
    fn destroy(&mut self);
}

#[derive(Default)]
pub struct EventHub {
    listeners: Vec<PlayerListener>,
}

impl EventHub {
    pub fn subscribe(&mut self, listener: PlayerListener) {
        self.listeners.push(listener);
    }

    pub fn emit(&mut self, event: &PlayerEvent) {
        debug!(?event, listeners = self.listeners.len(), "player event");
        for listener in &mut self.listeners {
            listener(event);
        }
    }
}

/// Playback clock shared by player implementations.
#[derive(Debug, Clone, PartialEq)]
pub struct Playhead {
    in_point: f64,
    out_point: f64,
    frame_rate: f64,
    current: f64,
    playing: bool,
    looping: bool,
}

impl Playhead {
    /// Looping playhead stopped at the in-point, the way a fresh upload
    /// sits until playback is started.
    pub fn new(meta: &AnimationMeta) -> Self {
        Self {
            in_point: meta.in_point,
            out_point: meta.out_point.max(meta.in_point),
            frame_rate: meta.frame_rate,
            current: meta.in_point,
            playing: false,
            looping: true,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn go_to_and_stop(&mut self, frame: f64) -> Result<()> {
        if !frame.is_finite() {
            bail!("cannot seek to non-finite frame {frame}");
        }
        self.current = frame.clamp(self.in_point, self.last_frame());
        self.playing = false;
        Ok(())
    }

    pub fn advance(&mut self, elapsed: Duration) {
        if !self.playing {
            return;
        }
        let span = self.out_point - self.in_point;
        if span <= 0.0 {
            self.current = self.in_point;
            return;
        }
        let next = self.current + elapsed.as_secs_f64() * self.frame_rate;
        if next < self.out_point {
            self.current = next;
        } else if self.looping {
            self.current = self.in_point + (next - self.in_point) % span;
        } else {
            self.current = self.last_frame();
            self.playing = false;
        }
    }

    fn last_frame(&self) -> f64 {
        (self.out_point - 1.0).max(self.in_point)
    }
}

/// Player without a raster backend.
///
/// Tracks lifecycle, playback and mutations so documents can be inspected and
/// edited without a GPU.
#[derive(Default)]
pub struct HeadlessPlayer {
    source: Option<Value>,
    playhead: Option<Playhead>,
    events: EventHub,
}

impl HeadlessPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> Option<&Value> {
        self.source.as_ref()
    }

    fn loaded_source(&mut self) -> Result<&mut Value> {
        self.source
            .as_mut()
            .ok_or_else(|| StudioError::NoAnimation.into())
    }
}

impl AnimationPlayer for HeadlessPlayer {
    fn load(&mut self, document: &AnimationDocument) -> Result<()> {
        self.source = Some(document.root().clone());
        self.playhead = Some(Playhead::new(document.meta()));
        self.events.emit(&PlayerEvent::Ready);
        Ok(())
    }

    fn subscribe(&mut self, listener: PlayerListener) {
        self.events.subscribe(listener);
    }

    fn is_loaded(&self) -> bool {
        self.source.is_some()
    }

    fn play(&mut self) {
        if let Some(playhead) = &mut self.playhead {
            playhead.play();
        }
    }

    fn pause(&mut self) {
        if let Some(playhead) = &mut self.playhead {
            playhead.pause();
        }
    }

    fn is_playing(&self) -> bool {
        self.playhead.as_ref().is_some_and(Playhead::is_playing)
    }

    fn seek(&mut self, frame: f64) -> Result<()> {
        match &mut self.playhead {
            Some(playhead) => playhead.go_to_and_stop(frame),
            None => Err(StudioError::NoAnimation.into()),
        }
    }

    fn tick(&mut self, elapsed: Duration) {
        if let Some(playhead) = &mut self.playhead {
            playhead.advance(elapsed);
        }
    }

    fn current_frame(&self) -> f64 {
        self.playhead.as_ref().map_or(0.0, Playhead::current)
    }

    fn set_text(&mut self, layer_index: usize, text: &str) -> Result<()> {
        document::set_text_in(self.loaded_source()?, layer_index, text)
    }

    fn set_fill_color(&mut self, layer_index: usize, color: Rgb) -> Result<()> {
        document::set_fill_color_in(self.loaded_source()?, layer_index, color)
    }

    fn rasterize(&mut self, _width: u32, _height: u32) -> Result<RgbaFrame> {
        Err(StudioError::RendererInit("headless player has no raster backend".to_owned()).into())
    }

    fn destroy(&mut self) {
        self.source = None;
        self.playhead = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;

    fn meta(in_point: f64, out_point: f64) -> AnimationMeta {
        AnimationMeta {
            version: "5.7.0".to_owned(),
            name: None,
            frame_rate: 10.0,
            in_point,
            out_point,
            width: 10,
            height: 10,
            layer_count: 0,
        }
    }

    #[test]
    fn playhead_loops_back_to_in_point() {
        let mut playhead = Playhead::new(&meta(10.0, 20.0));
        assert!(!playhead.is_playing());
        playhead.advance(Duration::from_millis(500));
        assert_eq!(playhead.current(), 10.0);

        playhead.play();

        playhead.advance(Duration::from_millis(500));
        assert!((playhead.current() - 15.0).abs() < 1e-9);

        playhead.advance(Duration::from_millis(700));
        assert!((playhead.current() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn seek_stops_playback_and_clamps() {
        let mut playhead = Playhead::new(&meta(0.0, 30.0));
        playhead.go_to_and_stop(100.0).unwrap();
        assert_eq!(playhead.current(), 29.0);
        assert!(!playhead.is_playing());

        playhead.advance(Duration::from_secs(1));
        assert_eq!(playhead.current(), 29.0);
        assert!(playhead.go_to_and_stop(f64::NAN).is_err());
    }

    #[test]
    fn blank_detection_compares_every_pixel() {
        let mut frame = RgbaFrame::solid(4, 4, [255, 255, 255, 255]);
        assert!(frame.is_blank());
        frame.pixels[21] = 0;
        assert!(!frame.is_blank());
    }

    #[test]
    fn headless_player_emits_ready_once_per_load() {
        let document = AnimationDocument::from_value(json!({
            "v": "5.7.0", "fr": 30, "op": 30, "layers": []
        }))
        .unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);

        let mut player = HeadlessPlayer::new();
        player.subscribe(Box::new(move |event| sink.lock().unwrap().push(event.clone())));
        player.load(&document).unwrap();

        assert_eq!(*events.lock().unwrap(), vec![PlayerEvent::Ready]);
        assert!(player.rasterize(8, 8).is_err());

        player.destroy();
        assert!(!player.is_loaded());
        assert!(player.seek(0.0).is_err());
    }
}

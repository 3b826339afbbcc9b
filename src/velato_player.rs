use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};
use vello::kurbo::Affine;
use vello::peniko::Color;
use vello::{AaConfig, AaSupport, RenderParams, RendererOptions, Scene};

use crate::document::{self, AnimationDocument, Rgb};
use crate::error_codes::StudioError;
use crate::player::{AnimationPlayer, EventHub, PlayerEvent, PlayerListener, Playhead, RgbaFrame};

/// Renders Lottie documents with velato scenes rasterized by vello on wgpu.
///
/// The GPU device is created on the first `rasterize` call, so loading and
/// editing work on machines without an adapter.
pub struct VelatoPlayer {
    background: Rgb,
    source: Option<Value>,
    composition: Option<velato::Composition>,
    stale: bool,
    playhead: Option<Playhead>,
    events: EventHub,
    scene_builder: velato::Renderer,
    scene: Scene,
    gpu: Option<GpuContext>,
}

struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    renderer: vello::Renderer,
    target: Option<RenderTarget>,
}

struct RenderTarget {
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback_buffer: wgpu::Buffer,
    unpadded_bytes_per_row: u32,
    padded_bytes_per_row: u32,
}

impl VelatoPlayer {
    pub fn new(background: Rgb) -> Self {
        Self {
            background,
            source: None,
            composition: None,
            stale: false,
            playhead: None,
            events: EventHub::default(),
            scene_builder: velato::Renderer::new(),
            scene: Scene::new(),
            gpu: None,
        }
    }

    fn parse_composition(&mut self, source: &Value) -> Result<velato::Composition> {
        match velato::Composition::from_str(&source.to_string()) {
            Ok(composition) => Ok(composition),
            Err(error) => {
                let reason = format!("{error:?}");
                warn!(%reason, "renderer rejected animation data");
                self.events.emit(&PlayerEvent::DataFailed(reason.clone()));
                Err(StudioError::DataFailed(reason).into())
            }
        }
    }

    fn refresh_composition(&mut self) -> Result<()> {
        if !self.stale {
            return Ok(());
        }
        let source = self
            .source
            .clone()
            .ok_or(StudioError::NoAnimation)?;
        let composition = self.parse_composition(&source)?;
        self.composition = Some(composition);
        self.stale = false;
        debug!("rebuilt composition after edit");
        Ok(())
    }

    fn loaded_source(&mut self) -> Result<&mut Value> {
        self.source
            .as_mut()
            .ok_or_else(|| StudioError::NoAnimation.into())
    }

    fn build_scene(&mut self, width: u32, height: u32) -> Result<()> {
        let composition = self
            .composition
            .as_ref()
            .ok_or(StudioError::NoAnimation)?;
        let frame = self.playhead.as_ref().map_or(composition.frames.start, Playhead::current);
        let transform = fit_transform(
            composition.width as f64,
            composition.height as f64,
            f64::from(width),
            f64::from(height),
        );

        self.scene.reset();
        self.scene_builder
            .append(composition, frame, transform, 1.0, &mut self.scene);
        Ok(())
    }
}

impl AnimationPlayer for VelatoPlayer {
    fn load(&mut self, document: &AnimationDocument) -> Result<()> {
        self.destroy();
        let source = document.root().clone();
        let composition = self.parse_composition(&source)?;
        info!(
            width = composition.width,
            height = composition.height,
            frames = composition.frames.end - composition.frames.start,
            "composition loaded"
        );
        self.source = Some(source);
        self.composition = Some(composition);
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
        document::set_text_in(self.loaded_source()?, layer_index, text)?;
        self.stale = true;
        Ok(())
    }

    fn set_fill_color(&mut self, layer_index: usize, color: Rgb) -> Result<()> {
        document::set_fill_color_in(self.loaded_source()?, layer_index, color)?;
        self.stale = true;
        Ok(())
    }

    fn rasterize(&mut self, width: u32, height: u32) -> Result<RgbaFrame> {
        if width == 0 || height == 0 {
            return Err(anyhow!("raster surface must be positive, got {width}x{height}"));
        }
        self.refresh_composition()?;
        self.build_scene(width, height)?;

        if self.gpu.is_none() {
            let context = pollster::block_on(GpuContext::new())
                .map_err(|error| StudioError::RendererInit(format!("{error:#}")))?;
            self.gpu = Some(context);
        }
        let background = self.background;
        let gpu = self
            .gpu
            .as_mut()
            .ok_or_else(|| anyhow!("gpu context missing after initialization"))?;
        gpu.render(&self.scene, width, height, background)
    }

    fn destroy(&mut self) {
        self.source = None;
        self.composition = None;
        self.playhead = None;
        self.stale = false;
        self.scene.reset();
    }
}

/// Scales the composition to fit inside the surface, centered.
fn fit_transform(source_width: f64, source_height: f64, width: f64, height: f64) -> Affine {
    if source_width <= 0.0 || source_height <= 0.0 {
        return Affine::IDENTITY;
    }
    let scale = (width / source_width).min(height / source_height);
    let offset_x = (width - source_width * scale) / 2.0;
    let offset_y = (height - source_height * scale) / 2.0;
    Affine::translate((offset_x, offset_y)) * Affine::scale(scale)
}

impl GpuContext {
    async fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("lottie-studio-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;

        let renderer = vello::Renderer::new(
            &device,
            RendererOptions {
                surface_format: None,
                use_cpu: false,
                antialiasing_support: AaSupport::area_only(),
                num_init_threads: NonZeroUsize::new(1),
            },
        )
        .map_err(|error| anyhow!("vello renderer init failed: {error:?}"))?;

        Ok(Self {
            device,
            queue,
            renderer,
            target: None,
        })
    }

    fn ensure_target(&mut self, width: u32, height: u32) -> Result<()> {
        if self
            .target
            .as_ref()
            .is_some_and(|target| target.width == width && target.height == height)
        {
            return Ok(());
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("lottie-studio-raster"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let unpadded_bytes_per_row = width
            .checked_mul(4)
            .ok_or_else(|| anyhow!("frame width overflow when computing row bytes"))?;
        let padded_bytes_per_row =
            align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lottie-studio-readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        self.target = Some(RenderTarget {
            width,
            height,
            texture,
            view,
            readback_buffer,
            unpadded_bytes_per_row,
            padded_bytes_per_row,
        });
        Ok(())
    }

    fn render(&mut self, scene: &Scene, width: u32, height: u32, background: Rgb) -> Result<RgbaFrame> {
        self.ensure_target(width, height)?;
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| anyhow!("render target missing"))?;

        self.renderer
            .render_to_texture(
                &self.device,
                &self.queue,
                scene,
                &target.view,
                &RenderParams {
                    base_color: Color::rgb8(background.r, background.g, background.b),
                    width,
                    height,
                    antialiasing_method: AaConfig::Area,
                },
            )
            .map_err(|error| anyhow!("vello render failed: {error:?}"))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lottie-studio-readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &target.readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = target.readback_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| anyhow!("failed receiving GPU map callback"))?
            .context("GPU buffer mapping failed")?;

        let row_bytes = target.unpadded_bytes_per_row as usize;
        let mapped = buffer_slice.get_mapped_range();
        let mut pixels = vec![0_u8; row_bytes * height as usize];
        for (row_index, chunk) in mapped
            .chunks(target.padded_bytes_per_row as usize)
            .take(height as usize)
            .enumerate()
        {
            let start = row_index * row_bytes;
            pixels[start..start + row_bytes].copy_from_slice(&chunk[..row_bytes]);
        }
        drop(mapped);
        target.readback_buffer.unmap();

        Ok(RgbaFrame {
            width,
            height,
            pixels,
        })
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

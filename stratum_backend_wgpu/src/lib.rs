// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! wgpu backend for stratum.
//!
//! [`WgpuBackend`] implements
//! [`RasterBackend`](stratum_core::backend::RasterBackend) over an explicit
//! wgpu device context. Framebuffers are RGBA8 textures usable both as
//! render attachments and as sampled sources; each `begin_frame`/`end_frame`
//! bracket records a batch of scissored quads and flushes them as a single
//! render pass.
//!
//! The screen target comes in two flavors:
//!
//! - [`WgpuBackend::for_window`] — renders the screen pass to a window
//!   surface and presents it (the embedder supplies anything wgpu can make
//!   a surface from, and forwards resizes via
//!   [`resize_surface`](WgpuBackend::resize_surface));
//! - [`WgpuBackend::headless`] — renders the screen pass to an internal
//!   offscreen texture, for tests and demos without a window.

mod pipeline;

use std::collections::HashMap;

use kurbo::{Point, Rect};

use stratum_core::backend::{
    Blend, Color, FramebufferId, RasterBackend, RenderTarget,
};
use stratum_core::error::BackendError;

use crate::pipeline::{PipelineCache, QuadBlend, QuadInstance};

const FBO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// A framebuffer: render-target texture plus the bind group to sample it.
struct Fbo {
    texture: wgpu::Texture,
    bind: wgpu::BindGroup,
    width: u32,
    height: u32,
}

/// Where the screen pass lands.
enum Screen {
    Offscreen {
        texture: Option<wgpu::Texture>,
        width: u32,
        height: u32,
    },
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
        frame: Option<wgpu::SurfaceTexture>,
    },
}

/// One recorded quad plus the state it must draw under.
struct QuadOp {
    blend: QuadBlend,
    texture: Option<u32>,
    scissor: Option<[u32; 4]>,
}

/// A frame being recorded.
struct PassState {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    scale: f64,
    origin: Point,
    scissor: Option<[u32; 4]>,
    ops: Vec<QuadOp>,
    instances: Vec<QuadInstance>,
}

impl PassState {
    fn to_device(&self, rect: Rect) -> Rect {
        Rect::new(
            (rect.x0 - self.origin.x) * self.scale,
            (rect.y0 - self.origin.y) * self.scale,
            (rect.x1 - self.origin.x) * self.scale,
            (rect.y1 - self.origin.y) * self.scale,
        )
    }

    fn to_ndc(&self, device: Rect) -> [f32; 4] {
        let (w, h) = (f64::from(self.width), f64::from(self.height));
        #[expect(
            clippy::cast_possible_truncation,
            reason = "NDC coordinates are small; f32 precision is the native GPU precision"
        )]
        let ndc = [
            (device.x0 / w * 2.0 - 1.0) as f32,
            (1.0 - device.y0 / h * 2.0) as f32,
            (device.x1 / w * 2.0 - 1.0) as f32,
            (1.0 - device.y1 / h * 2.0) as f32,
        ];
        ndc
    }

    /// Clamps a device rect to the target and rounds outward to whole
    /// pixels for `set_scissor_rect`.
    fn scissor_px(&self, device: Rect) -> Option<[u32; 4]> {
        let x0 = device.x0.floor().max(0.0);
        let y0 = device.y0.floor().max(0.0);
        let x1 = device.x1.ceil().min(f64::from(self.width));
        let y1 = device.y1.ceil().min(f64::from(self.height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "clamped to 0..=target dimensions above"
        )]
        let px = [x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32];
        Some(px)
    }
}

/// [`RasterBackend`] over a wgpu device.
pub struct WgpuBackend {
    _instance: wgpu::Instance,
    device: wgpu::Device,
    queue: wgpu::Queue,
    sampler: wgpu::Sampler,
    bind_layout: wgpu::BindGroupLayout,
    white: wgpu::BindGroup,
    pipelines: PipelineCache,
    fbos: HashMap<u32, Fbo>,
    next_id: u32,
    screen: Screen,
    bound: RenderTarget,
    pass: Option<PassState>,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("framebuffers", &self.fbos.len())
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}

impl WgpuBackend {
    /// Creates a backend whose screen target is an internal offscreen
    /// texture. `present()` is a no-op.
    ///
    /// # Errors
    ///
    /// [`BackendError::Backend`] if no adapter or device is available.
    pub fn headless(width: u32, height: u32) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let (_adapter, device, queue) = request_device(&instance, None)?;
        Ok(Self::from_parts(
            instance,
            device,
            queue,
            Screen::Offscreen {
                texture: None,
                width,
                height,
            },
        ))
    }

    /// Creates a backend rendering its screen pass to a window surface.
    ///
    /// `window` is anything wgpu can make a surface from (e.g.
    /// `Arc<winit::window::Window>`); `width`/`height` are the initial
    /// surface dimensions in physical pixels.
    ///
    /// # Errors
    ///
    /// [`BackendError::Backend`] if surface creation or device acquisition
    /// fails.
    pub fn for_window(
        window: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
    ) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let surface = instance
            .create_surface(window)
            .map_err(|err| BackendError::backend(format!("surface creation failed: {err}")))?;
        let (adapter, device, queue) = request_device(&instance, Some(&surface))?;
        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .first()
            .copied()
            .ok_or_else(|| BackendError::backend("surface reports no supported formats"))?;
        log::debug!("surface format {format:?}");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: Vec::new(),
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self::from_parts(
            instance,
            device,
            queue,
            Screen::Surface {
                surface,
                config,
                frame: None,
            },
        ))
    }

    fn from_parts(
        instance: wgpu::Instance,
        device: wgpu::Device,
        queue: wgpu::Queue,
        screen: Screen,
    ) -> Self {
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("stratum quad bind layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("stratum quad sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });

        // 1x1 white texture backing solid fills.
        let white_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("stratum white"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FBO_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            white_texture.as_image_copy(),
            &[255, 255, 255, 255],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let white_view = white_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let white = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stratum white bind"),
            layout: &bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&white_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let pipelines = PipelineCache::new(&device, &bind_layout);

        Self {
            _instance: instance,
            device,
            queue,
            sampler,
            bind_layout,
            white,
            pipelines,
            fbos: HashMap::new(),
            next_id: 0,
            screen,
            bound: RenderTarget::Screen,
            pass: None,
        }
    }

    /// Updates the screen-target dimensions after the window resizes
    /// (physical pixels).
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        match &mut self.screen {
            Screen::Offscreen {
                texture,
                width: w,
                height: h,
            } => {
                *texture = None;
                *w = width;
                *h = height;
            }
            Screen::Surface {
                surface, config, ..
            } => {
                config.width = width.max(1);
                config.height = height.max(1);
                surface.configure(&self.device, config);
            }
        }
    }

    fn make_fbo_bind(&self, view: &wgpu::TextureView) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stratum fbo bind"),
            layout: &self.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    /// Resolves the view and format for the target being bound, acquiring
    /// the surface frame for screen passes.
    fn target_view(&mut self, width: u32, height: u32) -> Option<(wgpu::TextureView, wgpu::TextureFormat)> {
        match self.bound {
            RenderTarget::Framebuffer(id) => {
                let Some(fbo) = self.fbos.get(&id.0) else {
                    log::error!("begin_frame on unknown framebuffer {id:?}");
                    return None;
                };
                let view = fbo.texture.create_view(&wgpu::TextureViewDescriptor::default());
                Some((view, FBO_FORMAT))
            }
            RenderTarget::Screen => match &mut self.screen {
                Screen::Offscreen {
                    texture,
                    width: w,
                    height: h,
                } => {
                    if texture.is_none() || *w != width || *h != height {
                        *w = width;
                        *h = height;
                        *texture = Some(self.device.create_texture(&wgpu::TextureDescriptor {
                            label: Some("stratum offscreen screen"),
                            size: wgpu::Extent3d {
                                width: width.max(1),
                                height: height.max(1),
                                depth_or_array_layers: 1,
                            },
                            mip_level_count: 1,
                            sample_count: 1,
                            dimension: wgpu::TextureDimension::D2,
                            format: FBO_FORMAT,
                            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                                | wgpu::TextureUsages::COPY_SRC,
                            view_formats: &[],
                        }));
                    }
                    let view = texture
                        .as_ref()
                        .expect("just created")
                        .create_view(&wgpu::TextureViewDescriptor::default());
                    Some((view, FBO_FORMAT))
                }
                Screen::Surface {
                    surface,
                    config,
                    frame,
                } => {
                    if config.width != width || config.height != height {
                        config.width = width.max(1);
                        config.height = height.max(1);
                        surface.configure(&self.device, config);
                    }
                    let acquired = match surface.get_current_texture() {
                        Ok(frame) => frame,
                        Err(err) => {
                            log::warn!("surface frame acquisition failed ({err}); reconfiguring");
                            surface.configure(&self.device, config);
                            match surface.get_current_texture() {
                                Ok(frame) => frame,
                                Err(err) => {
                                    log::error!("surface frame unavailable: {err}");
                                    return None;
                                }
                            }
                        }
                    };
                    let view = acquired
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default());
                    let format = config.format;
                    *frame = Some(acquired);
                    Some((view, format))
                }
            },
        }
    }

    fn record(
        &mut self,
        blend: QuadBlend,
        texture: Option<u32>,
        color: [f32; 4],
        device_rect: Rect,
        uv: [f32; 4],
    ) {
        let Some(pass) = &mut self.pass else {
            log::error!("draw call outside begin_frame/end_frame");
            return;
        };
        if device_rect.width() <= 0.0 || device_rect.height() <= 0.0 {
            return;
        }
        let pos = pass.to_ndc(device_rect);
        pass.ops.push(QuadOp {
            blend,
            texture,
            scissor: pass.scissor,
        });
        pass.instances.push(QuadInstance { pos, uv, color });
    }
}

impl RasterBackend for WgpuBackend {
    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<FramebufferId, BackendError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("stratum framebuffer"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FBO_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            log::warn!("framebuffer allocation failed: {err}");
            return Err(BackendError::OutOfDeviceMemory);
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind = self.make_fbo_bind(&view);
        let id = self.next_id;
        self.next_id += 1;
        self.fbos.insert(
            id,
            Fbo {
                texture,
                bind,
                width,
                height,
            },
        );
        Ok(FramebufferId(id))
    }

    fn delete_framebuffer(&mut self, id: FramebufferId) {
        if self.fbos.remove(&id.0).is_none() {
            log::warn!("delete of unknown framebuffer {id:?}");
        }
    }

    fn bind_framebuffer(&mut self, target: RenderTarget) {
        debug_assert!(self.pass.is_none(), "bind_framebuffer during an open frame");
        self.bound = target;
    }

    fn begin_frame(&mut self, width: f64, height: f64, scale: f64) {
        debug_assert!(self.pass.is_none(), "begin_frame without matching end_frame");
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "frame dimensions are positive pixel counts"
        )]
        let (px_w, px_h) = ((width * scale).ceil() as u32, (height * scale).ceil() as u32);
        let Some((view, format)) = self.target_view(px_w, px_h) else {
            return;
        };
        self.pass = Some(PassState {
            view,
            format,
            width: px_w,
            height: px_h,
            scale,
            origin: Point::ZERO,
            scissor: None,
            ops: Vec::new(),
            instances: Vec::new(),
        });
    }

    fn end_frame(&mut self) {
        let Some(pass) = self.pass.take() else {
            return;
        };
        if pass.ops.is_empty() {
            return;
        }

        // Build every pipeline the pass needs before opening it.
        for op in &pass.ops {
            self.pipelines.warm(&self.device, pass.format, op.blend);
        }

        use wgpu::util::DeviceExt;
        let instances = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("stratum quad instances"),
                contents: bytemuck::cast_slice(&pass.instances),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("stratum frame"),
            });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("stratum quad pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &pass.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_vertex_buffer(0, instances.slice(..));

            for (index, op) in pass.ops.iter().enumerate() {
                rpass.set_pipeline(self.pipelines.cached(pass.format, op.blend));
                match op.scissor {
                    Some([x, y, w, h]) => rpass.set_scissor_rect(x, y, w, h),
                    None => rpass.set_scissor_rect(0, 0, pass.width, pass.height),
                }
                let bind = match op.texture {
                    Some(id) => match self.fbos.get(&id) {
                        Some(fbo) => &fbo.bind,
                        None => {
                            log::error!("draw from deleted framebuffer {id}");
                            continue;
                        }
                    },
                    None => &self.white,
                };
                rpass.set_bind_group(0, bind, &[]);
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "instance counts are far below u32::MAX"
                )]
                let i = index as u32;
                rpass.draw(0..6, i..i + 1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn set_transform(&mut self, scale: f64, origin: Point) {
        if let Some(pass) = &mut self.pass {
            pass.scale = scale;
            pass.origin = origin;
        }
    }

    fn intersect_scissor(&mut self, rect: Rect) {
        let Some(pass) = &mut self.pass else {
            return;
        };
        let device = pass.to_device(rect);
        let incoming = pass.scissor_px(device);
        pass.scissor = match (pass.scissor, incoming) {
            (None, s) => s,
            // An empty incoming scissor clips everything out.
            (_, None) => Some([0, 0, 0, 0]),
            (Some([ax, ay, aw, ah]), Some([bx, by, bw, bh])) => {
                let x0 = ax.max(bx);
                let y0 = ay.max(by);
                let x1 = (ax + aw).min(bx + bw);
                let y1 = (ay + ah).min(by + bh);
                if x1 <= x0 || y1 <= y0 {
                    Some([0, 0, 0, 0])
                } else {
                    Some([x0, y0, x1 - x0, y1 - y0])
                }
            }
        };
    }

    fn clear(&mut self, color: Color) {
        let Some(pass) = &self.pass else {
            return;
        };
        // A clear is a blend-replacing quad over the scissor region (or the
        // whole target when unscissored).
        let device = match pass.scissor {
            Some([x, y, w, h]) => Rect::new(
                f64::from(x),
                f64::from(y),
                f64::from(x + w),
                f64::from(y + h),
            ),
            None => Rect::new(0.0, 0.0, f64::from(pass.width), f64::from(pass.height)),
        };
        self.record(
            QuadBlend::Replace,
            None,
            [color.r, color.g, color.b, color.a],
            device,
            [0.0, 0.0, 1.0, 1.0],
        );
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        let Some(pass) = &self.pass else {
            return;
        };
        let device = pass.to_device(rect);
        self.record(
            QuadBlend::SourceOver,
            None,
            [color.r, color.g, color.b, color.a],
            device,
            [0.0, 0.0, 1.0, 1.0],
        );
    }

    fn draw_framebuffer(&mut self, src: FramebufferId, src_offset: Point, dest: Rect, blend: Blend) {
        let Some(fbo) = self.fbos.get(&src.0) else {
            log::error!("draw from unknown framebuffer {src:?}");
            return;
        };
        let (tex_w, tex_h) = (f64::from(fbo.width), f64::from(fbo.height));
        let Some(pass) = &self.pass else {
            return;
        };
        let device = pass.to_device(dest);
        // The sampled region has the destination's pixel dimensions.
        #[expect(
            clippy::cast_possible_truncation,
            reason = "texture coordinates are normalized; f32 is the GPU's native precision"
        )]
        let uv = [
            (src_offset.x / tex_w) as f32,
            (src_offset.y / tex_h) as f32,
            ((src_offset.x + device.width()) / tex_w) as f32,
            ((src_offset.y + device.height()) / tex_h) as f32,
        ];
        self.record(
            blend.mode.into(),
            Some(src.0),
            [1.0, 1.0, 1.0, blend.weight],
            device,
            uv,
        );
    }

    fn present(&mut self) {
        if let Screen::Surface { frame, .. } = &mut self.screen {
            match frame.take() {
                Some(frame) => frame.present(),
                None => log::warn!("present without an acquired surface frame"),
            }
        }
        // Offscreen screen targets have nothing to flip.
    }
}

fn request_device(
    instance: &wgpu::Instance,
    compatible_surface: Option<&wgpu::Surface<'_>>,
) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue), BackendError> {
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface,
        force_fallback_adapter: false,
    }))
    .ok_or_else(|| BackendError::backend("no suitable GPU adapter"))?;

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("stratum device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
        },
        None,
    ))
    .map_err(|err| BackendError::backend(format!("device request failed: {err}")))?;
    Ok((adapter, device, queue))
}


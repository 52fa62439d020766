// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Quad pipeline: every draw the core performs is a scissored, optionally
//! textured rectangle, so one shader with a pipeline per (target format,
//! blend) pair covers the whole vocabulary. Solid fills sample a 1x1 white
//! texture; clears are quads with blending replaced.

use std::collections::HashMap;

use stratum_core::backend::BlendMode;

const QUAD_SHADER: &str = r#"
struct Quad {
    @location(0) pos: vec4<f32>,
    @location(1) uv: vec4<f32>,
    @location(2) color: vec4<f32>,
};

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
};

@group(0) @binding(0) var quad_texture: texture_2d<f32>;
@group(0) @binding(1) var quad_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32, quad: Quad) -> VsOut {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 0.0), vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0), vec2<f32>(1.0, 0.0), vec2<f32>(1.0, 1.0),
    );
    let corner = corners[vertex_index];

    var out: VsOut;
    out.position = vec4<f32>(
        mix(quad.pos.x, quad.pos.z, corner.x),
        mix(quad.pos.y, quad.pos.w, corner.y),
        0.0,
        1.0,
    );
    out.uv = vec2<f32>(mix(quad.uv.x, quad.uv.z, corner.x), mix(quad.uv.y, quad.uv.w, corner.y));
    out.color = quad.color;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(quad_texture, quad_sampler, in.uv) * in.color;
}
"#;

/// One instanced quad: positions in NDC, uv in texture space, straight-alpha
/// color multiplier.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct QuadInstance {
    pub pos: [f32; 4],
    pub uv: [f32; 4],
    pub color: [f32; 4],
}

impl QuadInstance {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x4, 1 => Float32x4, 2 => Float32x4];

    pub(crate) const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: &Self::ATTRIBUTES,
    };
}

/// Blend selection for a recorded quad. `Replace` is used for clears.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum QuadBlend {
    Replace,
    SourceOver,
    Multiply,
    Screen,
}

impl From<BlendMode> for QuadBlend {
    fn from(mode: BlendMode) -> Self {
        match mode {
            BlendMode::SourceOver => Self::SourceOver,
            BlendMode::Multiply => Self::Multiply,
            BlendMode::Screen => Self::Screen,
        }
    }
}

fn blend_state(blend: QuadBlend) -> wgpu::BlendState {
    match blend {
        QuadBlend::Replace => wgpu::BlendState::REPLACE,
        QuadBlend::SourceOver => wgpu::BlendState::ALPHA_BLENDING,
        QuadBlend::Multiply => wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::Dst,
                dst_factor: wgpu::BlendFactor::Zero,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent::OVER,
        },
        QuadBlend::Screen => wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrc,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent::OVER,
        },
    }
}

/// Lazily built pipelines keyed by (target format, blend).
pub(crate) struct PipelineCache {
    shader: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    pipelines: HashMap<(wgpu::TextureFormat, QuadBlend), wgpu::RenderPipeline>,
}

impl std::fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCache")
            .field("pipelines", &self.pipelines.len())
            .finish_non_exhaustive()
    }
}

impl PipelineCache {
    pub(crate) fn new(device: &wgpu::Device, bind_layout: &wgpu::BindGroupLayout) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("stratum quad shader"),
            source: wgpu::ShaderSource::Wgsl(QUAD_SHADER.into()),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("stratum quad pipeline layout"),
            bind_group_layouts: &[bind_layout],
            push_constant_ranges: &[],
        });
        Self {
            shader,
            layout,
            pipelines: HashMap::new(),
        }
    }

    /// Looks up a pipeline built by a prior [`warm`](Self::warm) call.
    pub(crate) fn cached(
        &self,
        format: wgpu::TextureFormat,
        blend: QuadBlend,
    ) -> &wgpu::RenderPipeline {
        self.pipelines
            .get(&(format, blend))
            .expect("pipeline warmed before the render pass")
    }

    /// Ensures the pipeline for `(format, blend)` exists.
    pub(crate) fn warm(
        &mut self,
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        blend: QuadBlend,
    ) {
        let (shader, layout) = (&self.shader, &self.layout);
        self.pipelines.entry((format, blend)).or_insert_with(|| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("stratum quad pipeline"),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some("vs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[QuadInstance::LAYOUT],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: Some("fs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(blend_state(blend)),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_mapping_covers_all_modes() {
        assert_eq!(QuadBlend::from(BlendMode::SourceOver), QuadBlend::SourceOver);
        assert_eq!(QuadBlend::from(BlendMode::Multiply), QuadBlend::Multiply);
        assert_eq!(QuadBlend::from(BlendMode::Screen), QuadBlend::Screen);
    }

    #[test]
    fn instance_layout_matches_struct_size() {
        assert_eq!(
            QuadInstance::LAYOUT.array_stride,
            (4 + 4 + 4) * 4,
            "three vec4 attributes"
        );
    }
}

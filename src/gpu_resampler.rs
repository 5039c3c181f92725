use glam::{DMat3, DVec3};
use half::f16;
use ndarray::Array2;
use std::borrow::Cow;
use tracing::debug;
use web_time::Instant;
use wgpu::{PollType, util::DeviceExt};

use crate::{
    enums::Interpolation,
    error::{ReconstructionError, Result},
    resampler::{PlaneMapping, ResampleOptions},
    volume::Volume,
};

const WORKGROUP_SIZE: u32 = 8;

/// Device and queue used for GPU reslicing.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Headless device on the default adapter.
    pub async fn request() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .map_err(|e| ReconstructionError::Gpu(format!("no compatible adapter: {e}")))?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Reslice Device"),
                required_limits: wgpu::Limits::downlevel_defaults(),
                ..Default::default()
            })
            .await
            .map_err(|e| ReconstructionError::Gpu(format!("failed to request device: {e}")))?;
        Ok(Self { device, queue })
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Uniforms {
    /// Voxel coordinate of output pixel (0, 0).
    origin: [f32; 4],
    col_step: [f32; 4],
    row_step: [f32; 4],
    dimensions: [u32; 4],
    output_width: u32,
    output_height: u32,
    mode: u32,
    background: f32,
}

/// Affine world to voxel transform of a uniform volume.
struct VoxelFrame {
    origin: DVec3,
    world_to_voxel: DMat3,
    dimensions: [u32; 4],
}

impl VoxelFrame {
    fn voxel(&self, world: DVec3) -> DVec3 {
        self.world_to_voxel * (world - self.origin)
    }
}

/// Reslices a uniform volume on the GPU.
///
/// The volume lives in an `R16Float` 3D texture, so results differ from
/// [`crate::Resampler`] by half precision rounding and hardware filtering.
pub struct GpuResampler {
    context: GpuContext,
    frame: VoxelFrame,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    volume_view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

impl GpuResampler {
    pub async fn new(volume: &Volume, context: GpuContext) -> Result<Self> {
        if !volume.is_uniform() {
            return Err(ReconstructionError::invalid_config(
                "GPU reslicing needs uniform slice spacing",
            ));
        }
        let (width, height, depth) = volume.dimensions();
        let to_u32 = |n: usize| {
            u32::try_from(n).map_err(|_| ReconstructionError::invalid_config("volume too large"))
        };
        let texture_size = wgpu::Extent3d {
            width: to_u32(width)?,
            height: to_u32(height)?,
            depth_or_array_layers: to_u32(depth)?,
        };
        let spacing = volume.spacing();
        let frame = VoxelFrame {
            origin: volume.origin(),
            world_to_voxel: DMat3::from_diagonal(spacing.recip())
                * volume.orientation().transpose(),
            dimensions: [
                texture_size.width,
                texture_size.height,
                texture_size.depth_or_array_layers,
                0,
            ],
        };
        let GpuContext { device, queue } = &context;

        let volume_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Volume 3D Texture"),
            size: texture_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: wgpu::TextureFormat::R16Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        // Standard layout of a [z, y, x] array is x fastest, as the texture expects.
        let texels: Vec<f16> = volume.data().iter().copied().map(f16::from_f32).collect();
        queue.write_texture(
            wgpu::TexelCopyTextureInfoBase {
                texture: &volume_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(texture_size.width * std::mem::size_of::<f16>() as u32),
                rows_per_image: Some(texture_size.height),
            },
            texture_size,
        );

        let volume_view = volume_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Volume Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Reslice Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("shaders/reslice.wgsl"))),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Reslice Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D3,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Reslice Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Reslice Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Ok(Self {
            context,
            frame,
            pipeline,
            bind_group_layout,
            volume_view,
            sampler,
        })
    }

    /// GPU counterpart of [`crate::Resampler::reslice_mapping`].
    pub async fn reslice(
        &self,
        mapping: &PlaneMapping,
        options: ResampleOptions,
    ) -> Result<Array2<f32>> {
        let started = Instant::now();
        let (width, height) = (mapping.width, mapping.height);
        let output_width = u32::try_from(width)
            .map_err(|_| ReconstructionError::invalid_config("raster too wide"))?;
        let output_height = u32::try_from(height)
            .map_err(|_| ReconstructionError::invalid_config("raster too tall"))?;
        // Three points fix the affine raster in voxel space.
        let origin = self.frame.voxel(mapping.to_world(0.0, 0.0));
        let col_step = self.frame.voxel(mapping.to_world(1.0, 0.0)) - origin;
        let row_step = self.frame.voxel(mapping.to_world(0.0, 1.0)) - origin;
        let lift = |v: DVec3| [v.x as f32, v.y as f32, v.z as f32, 0.0];

        let uniforms = Uniforms {
            origin: lift(origin),
            col_step: lift(col_step),
            row_step: lift(row_step),
            dimensions: self.frame.dimensions,
            output_width,
            output_height,
            mode: match options.interpolation {
                Interpolation::Nearest => 0,
                Interpolation::Trilinear => 1,
            },
            background: options.background,
        };

        let GpuContext { device, queue } = &self.context;
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Reslice Uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let output_bytes = (width * height * std::mem::size_of::<f32>()) as u64;
        let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Reslice Output"),
            size: output_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Reslice Staging"),
            size: output_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Reslice Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.volume_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Reslice Encoder"),
        });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Reslice Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(
                output_width.div_ceil(WORKGROUP_SIZE),
                output_height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, output_bytes);
        queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| ReconstructionError::Gpu(e.to_string()))?;
        receiver
            .await
            .map_err(|_| ReconstructionError::Gpu("readback channel closed".into()))?
            .map_err(|e| ReconstructionError::Gpu(e.to_string()))?;

        let values: Vec<f32> = {
            let data = buffer_slice.get_mapped_range();
            bytemuck::cast_slice(&data).to_vec()
        };
        staging_buffer.unmap();

        debug!(
            width,
            height,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "resliced plane on GPU"
        );
        Array2::from_shape_vec((height, width), values)
            .map_err(|e| ReconstructionError::Gpu(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_match_the_shader_layout() {
        assert_eq!(std::mem::size_of::<Uniforms>(), 80);
    }
}

//! Kernel programs with named, host-driven parameters
//!
//! A program is built from one compute stage, or from a vertex stage and an
//! optional fragment stage. Its bind group 0 layout is read from the WGSL
//! itself: storage buffers at their declared bindings, plus an optional
//! `var<uniform>` struct at [`PARAMS_BINDING`] whose members become the
//! program's named parameters.

use crate::{Bindable, GpuContext, SimError};
use glam::{Mat4, Vec3, Vec4};
use std::collections::BTreeMap;
use std::ops::Range;

/// Binding of the parameter block in every program
pub const PARAMS_BINDING: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Vertex,
    Fragment,
    Compute,
}

impl StageKind {
    fn entry_point(self) -> &'static str {
        match self {
            Self::Vertex => "vs_main",
            Self::Fragment => "fs_main",
            Self::Compute => "main",
        }
    }

    fn visibility(self) -> wgpu::ShaderStages {
        match self {
            Self::Vertex => wgpu::ShaderStages::VERTEX,
            Self::Fragment => wgpu::ShaderStages::FRAGMENT,
            Self::Compute => wgpu::ShaderStages::COMPUTE,
        }
    }
}

/// What the linked program will be used for
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgramTarget {
    Compute,
    Render {
        format: wgpu::TextureFormat,
        topology: wgpu::PrimitiveTopology,
    },
}

/// A parameter value as pushed to the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    F32(f32),
    U32(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Vec3,
    Vec4,
    Mat4,
    F32,
    U32,
}

impl ParamKind {
    fn name(self) -> &'static str {
        match self {
            Self::Vec3 => "vec3<f32>",
            Self::Vec4 => "vec4<f32>",
            Self::Mat4 => "mat4x4<f32>",
            Self::F32 => "f32",
            Self::U32 => "u32",
        }
    }

    fn from_naga(inner: &naga::TypeInner) -> Option<Self> {
        use naga::{ScalarKind, TypeInner, VectorSize};
        match inner {
            TypeInner::Scalar(s) if s.width == 4 => match s.kind {
                ScalarKind::Float => Some(Self::F32),
                ScalarKind::Uint => Some(Self::U32),
                _ => None,
            },
            TypeInner::Vector { size, scalar }
                if scalar.kind == ScalarKind::Float && scalar.width == 4 =>
            {
                match size {
                    VectorSize::Tri => Some(Self::Vec3),
                    VectorSize::Quad => Some(Self::Vec4),
                    _ => None,
                }
            }
            TypeInner::Matrix {
                columns: VectorSize::Quad,
                rows: VectorSize::Quad,
                scalar,
            } if scalar.kind == ScalarKind::Float && scalar.width == 4 => Some(Self::Mat4),
            _ => None,
        }
    }
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Vec3(_) => ParamKind::Vec3,
            Self::Vec4(_) => ParamKind::Vec4,
            Self::Mat4(_) => ParamKind::Mat4,
            Self::F32(_) => ParamKind::F32,
            Self::U32(_) => ParamKind::U32,
        }
    }

    fn write(&self, dst: &mut [u8]) {
        match self {
            Self::Vec3(v) => dst[..12].copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            Self::Vec4(v) => dst[..16].copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            Self::Mat4(m) => dst[..64].copy_from_slice(bytemuck::cast_slice(&m.to_cols_array())),
            Self::F32(f) => dst[..4].copy_from_slice(&f.to_ne_bytes()),
            Self::U32(u) => dst[..4].copy_from_slice(&u.to_ne_bytes()),
        }
    }
}

/// One member of the parameter block, as laid out by the shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformMember {
    pub offset: u32,
    pub kind: Option<ParamKind>,
}

/// Layout of the `var<uniform>` struct at [`PARAMS_BINDING`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    pub span: u32,
    pub members: BTreeMap<String, UniformMember>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    Storage { read_only: bool },
    Uniform,
}

/// Parse and validate one WGSL stage
pub fn compile_stage(label: &str, source: &str) -> Result<naga::Module, SimError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| SimError::Compile {
        label: label.to_string(),
        diagnostics: e.emit_to_string(source),
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).map_err(|e| SimError::Compile {
        label: label.to_string(),
        diagnostics: format!("{e:?}"),
    })?;

    Ok(module)
}

/// Read the parameter block layout out of a compiled module, if it has one
pub fn uniform_layout(module: &naga::Module) -> Option<UniformLayout> {
    let (_, global) = module.global_variables.iter().find(|(_, var)| {
        var.space == naga::AddressSpace::Uniform
            && var
                .binding
                .as_ref()
                .is_some_and(|b| b.group == 0 && b.binding == PARAMS_BINDING)
    })?;

    let naga::TypeInner::Struct { members, span } = &module.types[global.ty].inner else {
        return None;
    };

    let members = members
        .iter()
        .filter_map(|member| {
            let name = member.name.clone()?;
            let kind = ParamKind::from_naga(&module.types[member.ty].inner);
            Some((
                name,
                UniformMember {
                    offset: member.offset,
                    kind,
                },
            ))
        })
        .collect();

    Some(UniformLayout {
        span: *span,
        members,
    })
}

fn slot_kinds(module: &naga::Module) -> Vec<(u32, SlotKind)> {
    module
        .global_variables
        .iter()
        .filter_map(|(_, var)| {
            let binding = var.binding.as_ref().filter(|b| b.group == 0)?;
            let kind = match var.space {
                naga::AddressSpace::Storage { access } => SlotKind::Storage {
                    read_only: !access.contains(naga::StorageAccess::STORE),
                },
                naga::AddressSpace::Uniform => SlotKind::Uniform,
                _ => return None,
            };
            Some((binding.binding, kind))
        })
        .collect()
}

type Getter<P> = Box<dyn Fn(&P) -> ParamValue>;

struct Parameter<P> {
    name: String,
    offset: u32,
    kind: ParamKind,
    getter: Getter<P>,
}

enum Pipeline {
    Compute(wgpu::ComputePipeline),
    Render(wgpu::RenderPipeline),
}

struct ParamBlock {
    layout: UniformLayout,
    buffer: wgpu::Buffer,
}

struct Linked {
    pipeline: Pipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    /// Storage slots the program declares
    storage_slots: Vec<u32>,
    params: Option<ParamBlock>,
}

/// An executable kernel whose parameters are pulled from a `P` on every
/// invocation
pub struct KernelProgram<P> {
    label: String,
    stages: Vec<(StageKind, String)>,
    linked: Option<Linked>,
    parameters: Vec<Parameter<P>>,
}

impl<P> KernelProgram<P> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stages: Vec::new(),
            linked: None,
            parameters: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn attach_stage(&mut self, kind: StageKind, source: impl Into<String>) -> &mut Self {
        self.stages.push((kind, source.into()));
        self
    }

    pub fn is_linked(&self) -> bool {
        self.linked.is_some()
    }

    /// Compile every attached stage and link them into a pipeline.
    ///
    /// On failure the program stays unlinked and every later dispatch or draw
    /// returns [`SimError::NotLinked`].
    pub fn finalize(&mut self, ctx: &GpuContext, target: ProgramTarget) -> Result<(), SimError> {
        self.linked = None;
        self.parameters.clear();

        let stage_kinds: Vec<StageKind> = self.stages.iter().map(|(kind, _)| *kind).collect();
        let valid = match target {
            ProgramTarget::Compute => stage_kinds == [StageKind::Compute],
            ProgramTarget::Render { .. } => {
                stage_kinds == [StageKind::Vertex]
                    || stage_kinds == [StageKind::Vertex, StageKind::Fragment]
            }
        };
        if !valid {
            return Err(SimError::Link {
                label: self.label.clone(),
                diagnostics: format!("stages {stage_kinds:?} do not form a {target:?} program"),
            });
        }

        // Reflect every stage and merge their bindings
        let mut slots: BTreeMap<u32, (SlotKind, wgpu::ShaderStages)> = BTreeMap::new();
        let mut uniform: Option<UniformLayout> = None;
        for (kind, source) in &self.stages {
            let module = compile_stage(&self.label, source)?;
            for (binding, slot_kind) in slot_kinds(&module) {
                let entry = slots
                    .entry(binding)
                    .or_insert((slot_kind, wgpu::ShaderStages::NONE));
                if entry.0 != slot_kind {
                    return Err(SimError::Link {
                        label: self.label.clone(),
                        diagnostics: format!("binding {binding} declared differently across stages"),
                    });
                }
                entry.1 |= kind.visibility();
            }
            if uniform.is_none() {
                uniform = uniform_layout(&module);
            }
        }

        let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = slots
            .iter()
            .map(|(&binding, &(kind, visibility))| wgpu::BindGroupLayoutEntry {
                binding,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: match kind {
                        SlotKind::Storage { read_only } => {
                            wgpu::BufferBindingType::Storage { read_only }
                        }
                        SlotKind::Uniform => wgpu::BufferBindingType::Uniform,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let device = &ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Bind Group Layout", self.label)),
            entries: &layout_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", self.label)),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let modules: Vec<(StageKind, wgpu::ShaderModule)> = self
            .stages
            .iter()
            .map(|(kind, source)| {
                let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&format!("{} {kind:?} Shader", self.label)),
                    source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
                });
                (*kind, module)
            })
            .collect();

        let pipeline = match target {
            ProgramTarget::Compute => {
                Pipeline::Compute(device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&format!("{} Pipeline", self.label)),
                    layout: Some(&pipeline_layout),
                    module: &modules[0].1,
                    entry_point: Some(StageKind::Compute.entry_point()),
                    compilation_options: Default::default(),
                    cache: None,
                }))
            }
            ProgramTarget::Render { format, topology } => {
                let targets = [Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })];
                let fragment = modules.get(1).map(|(_, module)| wgpu::FragmentState {
                    module,
                    entry_point: Some(StageKind::Fragment.entry_point()),
                    targets: &targets,
                    compilation_options: Default::default(),
                });
                Pipeline::Render(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&format!("{} Pipeline", self.label)),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &modules[0].1,
                        entry_point: Some(StageKind::Vertex.entry_point()),
                        buffers: &[],
                        compilation_options: Default::default(),
                    },
                    fragment,
                    primitive: wgpu::PrimitiveState {
                        topology,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                }))
            }
        };

        let params = uniform.map(|layout| {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{} Params Buffer", self.label)),
                size: (layout.span as u64).next_multiple_of(16).max(16),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            ParamBlock { layout, buffer }
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(SimError::Link {
                label: self.label.clone(),
                diagnostics: error.to_string(),
            });
        }

        log::debug!("Linked program {}", self.label);

        self.linked = Some(Linked {
            pipeline,
            bind_group_layout,
            storage_slots: slots
                .iter()
                .filter(|(_, (kind, _))| matches!(kind, SlotKind::Storage { .. }))
                .map(|(&binding, _)| binding)
                .collect(),
            params,
        });
        Ok(())
    }

    fn linked(&self) -> Result<&Linked, SimError> {
        self.linked.as_ref().ok_or_else(|| SimError::NotLinked {
            label: self.label.clone(),
        })
    }

    /// Register `getter` as the source of parameter `name`. It is re-read on
    /// every [`activate`](Self::activate), so later changes to the host value
    /// need no re-registration. Binding a name twice replaces the getter.
    pub fn bind_parameter(
        &mut self,
        name: &str,
        getter: impl Fn(&P) -> ParamValue + 'static,
    ) -> Result<(), SimError> {
        let member = self
            .linked()?
            .params
            .as_ref()
            .and_then(|block| block.layout.members.get(name))
            .cloned()
            .ok_or_else(|| SimError::UnknownParameter {
                label: self.label.clone(),
                name: name.to_string(),
            })?;

        let kind = member.kind.ok_or_else(|| SimError::ParameterType {
            name: name.to_string(),
            expected: "a supported parameter type",
            found: "an unsupported shader type",
        })?;

        self.parameters.retain(|p| p.name != name);
        self.parameters.push(Parameter {
            name: name.to_string(),
            offset: member.offset,
            kind,
            getter: Box::new(getter),
        });
        Ok(())
    }

    /// Layout of the parameter block, once linked
    pub fn uniform_layout(&self) -> Option<&UniformLayout> {
        self.linked.as_ref()?.params.as_ref().map(|block| &block.layout)
    }

    /// Push the current value of every bound parameter
    pub fn activate(&self, ctx: &GpuContext, source: &P) -> Result<(), SimError> {
        let Some(block) = &self.linked()?.params else {
            return Ok(());
        };

        let mut bytes = vec![0u8; block.buffer.size() as usize];
        for parameter in &self.parameters {
            let value = (parameter.getter)(source);
            if value.kind() != parameter.kind {
                return Err(SimError::ParameterType {
                    name: parameter.name.clone(),
                    expected: parameter.kind.name(),
                    found: value.kind().name(),
                });
            }
            value.write(&mut bytes[parameter.offset as usize..]);
        }
        ctx.queue.write_buffer(&block.buffer, 0, &bytes);
        Ok(())
    }

    fn bind_group(
        &self,
        ctx: &GpuContext,
        linked: &Linked,
        buffers: &[&dyn Bindable],
    ) -> Result<wgpu::BindGroup, SimError> {
        for buffer in buffers {
            if !linked.storage_slots.contains(&buffer.slot()) {
                return Err(SimError::UnexpectedBinding {
                    label: self.label.clone(),
                    slot: buffer.slot(),
                });
            }
        }

        let mut entries = Vec::with_capacity(linked.storage_slots.len() + 1);
        for &slot in &linked.storage_slots {
            let buffer = buffers
                .iter()
                .find(|b| b.slot() == slot)
                .ok_or_else(|| SimError::MissingBinding {
                    label: self.label.clone(),
                    slot,
                })?;
            entries.push(wgpu::BindGroupEntry {
                binding: slot,
                resource: buffer.binding(),
            });
        }
        if let Some(block) = &linked.params {
            entries.push(wgpu::BindGroupEntry {
                binding: PARAMS_BINDING,
                resource: block.buffer.as_entire_binding(),
            });
        }

        Ok(ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Bind Group", self.label)),
            layout: &linked.bind_group_layout,
            entries: &entries,
        }))
    }

    /// Activate and run `groups` work-groups. Returns once submitted; the
    /// queue orders it before any later upload, dispatch or download.
    pub fn dispatch(
        &self,
        ctx: &GpuContext,
        source: &P,
        buffers: &[&dyn Bindable],
        groups: u32,
    ) -> Result<(), SimError> {
        let linked = self.linked()?;
        let Pipeline::Compute(pipeline) = &linked.pipeline else {
            return Err(SimError::Link {
                label: self.label.clone(),
                diagnostics: "not a compute program".to_string(),
            });
        };

        let max = ctx.limits().max_compute_workgroups_per_dimension;
        if groups > max {
            return Err(SimError::DispatchTooLarge { groups, max });
        }

        self.activate(ctx, source)?;
        let bind_group = self.bind_group(ctx, linked, buffers)?;

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&format!("{} Encoder", self.label)),
            });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&format!("{} Pass", self.label)),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(groups, 1, 1);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Activate and record a draw of `vertices` into `pass`
    pub fn draw(
        &self,
        ctx: &GpuContext,
        source: &P,
        buffers: &[&dyn Bindable],
        pass: &mut wgpu::RenderPass<'_>,
        vertices: Range<u32>,
    ) -> Result<(), SimError> {
        let linked = self.linked()?;
        let Pipeline::Render(pipeline) = &linked.pipeline else {
            return Err(SimError::Link {
                label: self.label.clone(),
                diagnostics: "not a render program".to_string(),
            });
        };

        self.activate(ctx, source)?;
        let bind_group = self.bind_group(ctx, linked, buffers)?;

        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(vertices, 0..1);
        Ok(())
    }
}

//! mumesh - command-line front end for mesh archives.
//!
//! Usage: mumesh <COMMAND> [OPTIONS] <INPUT> [OUTPUT]
//!
//! Run `mumesh --help` for available commands. Set `RUST_LOG=debug` for
//! operator diagnostics.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use nalgebra::{Matrix4, UnitQuaternion, Vector3};

use mutable_mesh::algo::{clip, difference, skinning, transform};
use mutable_mesh::buffer::MeshBufferSemantic;
use mutable_mesh::error::Result;
use mutable_mesh::io;
use mutable_mesh::layout::{self, LayoutOptions};
use mutable_mesh::mesh::{is_mesh_closed, vertex_ids, Mesh, VertexIdMode};

#[derive(Parser)]
#[command(name = "mumesh")]
#[command(author, version, about = "Mesh archive processing CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display mesh information
    Info {
        /// Input mesh archive
        input: PathBuf,

        /// List every vertex buffer channel
        #[arg(long)]
        channels: bool,
    },

    /// Remove the vertices inside a closed clip mesh
    Clip {
        /// Input mesh archive
        input: PathBuf,

        /// Clip mesh archive
        clip: PathBuf,

        /// Output mesh archive
        output: PathBuf,

        /// Snapping epsilon as a fraction of the clip bounds diagonal
        #[arg(long, default_value = "1e-6")]
        epsilon_scale: f32,

        /// Write a removal mask instead of the clipped mesh
        #[arg(long)]
        mask: bool,

        /// Use single-threaded execution (for benchmarking)
        #[arg(long)]
        sequential: bool,
    },

    /// Build a morph target holding the vertices that differ
    Difference {
        /// Base mesh archive
        base: PathBuf,

        /// Target mesh archive
        target: PathBuf,

        /// Output morph archive
        output: PathBuf,

        /// Ignore texture coordinates
        #[arg(long)]
        ignore_uvs: bool,
    },

    /// Narrow bone indices to the bones each surface uses
    OptimizeSkinning {
        /// Input mesh archive
        input: PathBuf,

        /// Output mesh archive
        output: PathBuf,
    },

    /// Apply an affine transform to every vertex
    Transform {
        /// Input mesh archive
        input: PathBuf,

        /// Output mesh archive
        output: PathBuf,

        /// Translation
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
        translate: Option<Vec<f32>>,

        /// Rotation as Euler angles in degrees (roll, pitch, yaw)
        #[arg(long, num_args = 3, value_names = ["ROLL", "PITCH", "YAW"], allow_negative_numbers = true)]
        rotate: Option<Vec<f32>>,

        /// Uniform scale
        #[arg(long, default_value = "1.0")]
        scale: f32,
    },

    /// Generate layout blocks from UV islands
    Layout {
        /// Input mesh archive
        input: PathBuf,

        /// Output mesh archive
        output: PathBuf,

        /// Texture coordinate set
        #[arg(long, default_value = "0")]
        uv: i32,

        /// Layout grid size
        #[arg(long, default_value = "4")]
        grid: u16,

        /// Write the coverage mask of every block as PNG into this directory
        #[arg(long)]
        masks: Option<PathBuf>,

        /// Mask resolution in texels per grid cell
        #[arg(long, default_value = "64")]
        texels: u32,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> std::result::Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Info { input, channels } => {
            cmd_info(&input, channels)?;
        }

        Commands::Clip {
            input,
            clip,
            output,
            epsilon_scale,
            mask,
            sequential,
        } => {
            cmd_clip(&input, &clip, &output, epsilon_scale, mask, sequential)?;
        }

        Commands::Difference {
            base,
            target,
            output,
            ignore_uvs,
        } => {
            let base_mesh = io::load(&base)?;
            let target_mesh = io::load(&target)?;
            let start = Instant::now();
            let result = difference::difference(&base_mesh, &target_mesh, &[], ignore_uvs);
            let morph = keep_source_on_no_op(result, Mesh::new, "difference")?;
            println!("Morph: {} vertices differ", morph.vertex_count());
            save(&morph, &output, start)?;
        }

        Commands::OptimizeSkinning { input, output } => {
            let mesh = io::load(&input)?;
            let start = Instant::now();
            println!(
                "Bone map: {} entries, widest surface uses {}",
                mesh.bone_map.len(),
                skinning::max_bone_map_count(&mesh)
            );
            let result = skinning::optimize_skinning(&mesh);
            let mesh = keep_source_on_no_op(result, || mesh.clone(), "optimize-skinning")?;
            save(&mesh, &output, start)?;
        }

        Commands::Transform {
            input,
            output,
            translate,
            rotate,
            scale,
        } => {
            let mesh = io::load(&input)?;
            let matrix = build_matrix(translate.as_deref(), rotate.as_deref(), scale);
            let start = Instant::now();
            let result = transform::transform(&mesh, &matrix);
            let mesh = keep_source_on_no_op(result, || mesh.clone(), "transform")?;
            save(&mesh, &output, start)?;
        }

        Commands::Layout {
            input,
            output,
            uv,
            grid,
            masks,
            texels,
        } => {
            cmd_layout(&input, &output, uv, grid, masks.as_deref(), texels)?;
        }
    }

    Ok(())
}

/// Unwrap an operator result, falling back to `source` for expected no-ops.
fn keep_source_on_no_op(
    result: Result<Mesh>,
    source: impl FnOnce() -> Mesh,
    operation: &str,
) -> Result<Mesh> {
    match result {
        Ok(mesh) => Ok(mesh),
        Err(e) if e.is_no_op() => {
            log::warn!("{operation}: {e}; keeping the source mesh");
            Ok(source())
        }
        Err(e) => Err(e),
    }
}

fn save(mesh: &Mesh, output: &Path, start: Instant) -> Result<()> {
    let elapsed = start.elapsed();
    io::save(mesh, output)?;
    println!(
        "Saved: {} ({} vertices, {} triangles, {:.2?})",
        output.display(),
        mesh.vertex_count(),
        mesh.face_count(),
        elapsed
    );
    Ok(())
}

fn build_matrix(translate: Option<&[f32]>, rotate: Option<&[f32]>, scale: f32) -> Matrix4<f32> {
    let translation = translate
        .map(|t| Vector3::new(t[0], t[1], t[2]))
        .unwrap_or_else(Vector3::zeros);
    let rotation = rotate
        .map(|r| {
            UnitQuaternion::from_euler_angles(r[0].to_radians(), r[1].to_radians(), r[2].to_radians())
        })
        .unwrap_or_else(UnitQuaternion::identity);
    Matrix4::new_translation(&translation) * rotation.to_homogeneous() * Matrix4::new_scaling(scale)
}

fn cmd_info(input: &Path, show_channels: bool) -> Result<()> {
    let mesh = io::load(input)?;

    println!("File: {}", input.display());
    if mesh.is_reference() {
        println!(
            "Reference: resource {} (morph \"{}\")",
            mesh.reference_id, mesh.referenced_morph
        );
        return Ok(());
    }
    println!("Vertices: {}", mesh.vertex_count());
    println!("Triangles: {}", mesh.face_count());
    println!("Data size: {} bytes", mesh.data_size());

    let mode = match mesh.vertex_id_mode() {
        VertexIdMode::Implicit => "implicit",
        VertexIdMode::Relative => "relative",
        VertexIdMode::Explicit => "explicit",
    };
    println!("Vertex ids: {} (prefix {})", mode, mesh.mesh_id_prefix);
    let ids = vertex_ids(&mesh);
    if let (Some(first), Some(last)) = (ids.first(), ids.last()) {
        println!("Id range: {:#x} .. {:#x}", first, last);
    }

    println!("Surfaces: {}", mesh.surfaces.len());
    for (i, surface) in mesh.surfaces.iter().enumerate() {
        println!(
            "  [{}] id {}: {} vertices, {} indices in {} submeshes",
            i,
            surface.id,
            surface.vertex_count(),
            surface.index_count(),
            surface.sub_meshes.len()
        );
    }

    if let Some(positions) = mesh.positions() {
        let bounds = mutable_mesh::geometry::Aabb::from_points(&positions);
        if !bounds.is_empty() {
            let size = bounds.max - bounds.min;
            println!(
                "Bounding box: ({:.3}, {:.3}, {:.3}) to ({:.3}, {:.3}, {:.3})",
                bounds.min.x, bounds.min.y, bounds.min.z, bounds.max.x, bounds.max.y, bounds.max.z
            );
            println!("Dimensions: {:.3} x {:.3} x {:.3}", size.x, size.y, size.z);
        }
    }
    if mesh.face_count() > 0 {
        if is_mesh_closed(&mesh) {
            println!("Topology: Closed");
        } else {
            println!("Topology: Open");
        }
    }

    println!("Bone map: {} bones, {} poses", mesh.bone_map.len(), mesh.bone_poses.len());
    if let Some(body) = &mesh.physics_body {
        println!(
            "Physics: {} bodies, {} primitives",
            body.body_count(),
            body.primitive_count()
        );
    }
    println!("Layouts: {}", mesh.layouts.len());
    for (kind, set) in &mesh.additional_buffers {
        println!("Additional buffer {:?}: {} elements", kind, set.element_count());
    }
    if !mesh.tags.is_empty() {
        println!("Tags: {}", mesh.tags.join(", "));
    }

    if show_channels {
        println!("\nVertex channels:");
        for (b, buffer) in mesh.vertex_buffers.buffers().iter().enumerate() {
            for c in &buffer.channels {
                println!(
                    "  buffer {} +{:<3} {:?}[{}] {:?} x{}",
                    b, c.offset, c.semantic, c.semantic_index, c.format, c.component_count
                );
            }
        }
    }
    Ok(())
}

fn cmd_clip(
    input: &Path,
    clip_path: &Path,
    output: &Path,
    epsilon_scale: f32,
    mask: bool,
    sequential: bool,
) -> Result<()> {
    let mesh = io::load(input)?;
    let clip_mesh = io::load(clip_path)?;
    println!(
        "Loaded: {} vertices, clip mesh {} triangles",
        mesh.vertex_count(),
        clip_mesh.face_count()
    );

    let mut options = clip::ClipOptions::default().with_epsilon_scale(epsilon_scale);
    if sequential {
        options = options.sequential();
    }
    let mode = if sequential { "sequential" } else { "parallel" };

    let start = Instant::now();
    let result = if mask {
        println!("Building clip mask ({})...", mode);
        clip::mask_clip_mesh(&mesh, &clip_mesh, &options)
    } else {
        println!("Clipping ({})...", mode);
        clip::clip_with_mesh(&mesh, &clip_mesh, &options)
    };
    let result = keep_source_on_no_op(result, || mesh.clone(), "clip")?;
    save(&result, output, start)
}

fn cmd_layout(
    input: &Path,
    output: &Path,
    uv: i32,
    grid: u16,
    masks: Option<&Path>,
    texels: u32,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut mesh = io::load(input)?;
    let start = Instant::now();
    let options = LayoutOptions::default()
        .with_uv_channel(uv)
        .with_grid_size([grid, grid]);
    let (generated, blocks) = layout::generate_blocks(&mut mesh, &options)?;
    let unassigned = blocks.iter().filter(|&&b| b == layout::NO_BLOCK).count();
    println!(
        "Blocks: {} on a {}x{} grid ({} vertices without block)",
        generated.blocks.len(),
        grid,
        grid,
        unassigned
    );

    if let Some(dir) = masks {
        std::fs::create_dir_all(dir)?;
        for (i, block) in generated.blocks.iter().enumerate() {
            let size = [
                block.size[0] as u32 * texels,
                block.size[1] as u32 * texels,
            ];
            let image = layout::block_mask(&mesh, &generated, i, size, 2, uv)?;
            let path = dir.join(format!("block_{}.png", block.id));
            image.save(&path)?;
        }
        println!("Masks: {}", dir.display());
    }

    let slot = uv.max(0) as usize;
    let generated = std::sync::Arc::new(generated);
    if slot < mesh.layouts.len() {
        mesh.layouts[slot] = generated;
    } else {
        mesh.layouts.push(generated);
    }
    if !mesh.has_vertex_channel(MeshBufferSemantic::LayoutBlock, uv) {
        log::warn!("no layout block channel written for uv set {uv}");
    }
    save(&mesh, output, start)?;
    Ok(())
}

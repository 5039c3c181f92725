use std::{error::Error, fs, path::PathBuf, sync::Arc};

use clap::Parser;
use dicom_reconstruction::{
    BoneDensityStatistics, CandidateRegion, CrosshairSession, GpuContext, GpuResampler,
    ModalityProfile, Orientation, PlaneSet, ProjectionEngine, RasterSize, ReconstructionConfig,
    Reduction, RegionDetection, RenderOptions, RenderQuality, ResampleOptions,
    TransferFunctionConfig, ViewDirection, Volume, VolumeLoader, VolumeRenderer, WindowPreset,
    apply_transfer,
};
use ndarray::Array2;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the .dcm files of one series
    #[arg(short, long, value_name = "DIR")]
    input: PathBuf,

    /// Directory the PNG files are written to
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// JSON reconstruction config
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// fast, normal or high
    #[arg(short, long)]
    quality: Option<RenderQuality>,

    /// max, min or average
    #[arg(short, long, default_value = "max")]
    reduction: Reduction,

    /// Display profile of the MPR planes: ct-bone, ct-soft-tissue, mr-t1,
    /// mr-t2, pet-suv, spect-tracer or generic-linear
    #[arg(short, long, default_value = "ct-soft-tissue")]
    profile: ModalityProfile,

    /// Reslice the MPR planes on the GPU
    #[arg(long)]
    gpu: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Cli::parse();
    let mut config = match &args.config {
        Some(path) => ReconstructionConfig::load(path)?,
        None => ReconstructionConfig::default(),
    };
    if let Some(quality) = args.quality {
        config.quality = quality;
    }

    let volume = Arc::new(VolumeLoader::load_from_directory(&args.input, &config)?);
    fs::create_dir_all(&args.output)?;

    let profile = args.profile.configured(&config);
    let detection = if profile.is_colormap() {
        RegionDetection::Detect
    } else {
        RegionDetection::Skip
    };
    let options = ResampleOptions {
        interpolation: config.interpolation,
        background: profile.air_value(),
    };
    let session = CrosshairSession::new(Arc::clone(&volume), RasterSize::Isotropic, options)?;
    let planes = if args.gpu {
        match reslice_on_gpu(&session, &volume, options).await {
            Ok(planes) => planes,
            Err(error) => {
                warn!(%error, "GPU reslicing unavailable, using the CPU");
                session.render_all()?
            }
        }
    } else {
        session.render_all()?
    };
    for (orientation, image) in planes.iter() {
        let transfer = TransferFunctionConfig::auto(image.view(), profile)?;
        let name = format!("mpr_{orientation}.png");
        let regions = save(&args, &name, image, &transfer, detection)?;
        if !regions.is_empty() {
            info!(%orientation, regions = regions.len(), "candidate regions");
        }
    }

    let projections = ProjectionEngine::project(&volume, args.reduction, None);
    let transfer = TransferFunctionConfig::from_preset(WindowPreset::Bone);
    for orientation in Orientation::ALL {
        let name = format!("{}_{orientation}.png", args.reduction);
        save(&args, &name, projections.get(orientation), &transfer, RegionDetection::Skip)?;
    }

    let bone = VolumeRenderer::render_bone(
        &volume,
        config.bone_threshold,
        ViewDirection::Principal(Orientation::Coronal),
        RenderOptions::from_config(&config),
    )?;
    bone.save(args.output.join("bone_3d.png"))?;

    match BoneDensityStatistics::compute(&volume, config.bone_threshold) {
        Some(stats) => info!(
            bone_voxels = stats.bone_voxels,
            bone_percentage = stats.bone_percentage,
            mean_density = stats.mean_density,
            "bone density"
        ),
        None => info!(threshold = config.bone_threshold, "no voxels above the bone threshold"),
    }
    Ok(())
}

async fn reslice_on_gpu(
    session: &CrosshairSession,
    volume: &Volume,
    options: ResampleOptions,
) -> dicom_reconstruction::Result<PlaneSet<Array2<f32>>> {
    let resampler = GpuResampler::new(volume, GpuContext::request().await?).await?;
    let state = session.state();
    Ok(PlaneSet {
        axial: resampler
            .reslice(&session.mapping(Orientation::Axial, state)?, options)
            .await?,
        coronal: resampler
            .reslice(&session.mapping(Orientation::Coronal, state)?, options)
            .await?,
        sagittal: resampler
            .reslice(&session.mapping(Orientation::Sagittal, state)?, options)
            .await?,
    })
}

fn save(
    args: &Cli,
    name: &str,
    image: &Array2<f32>,
    transfer: &TransferFunctionConfig,
    detection: RegionDetection,
) -> Result<Vec<CandidateRegion>, Box<dyn Error>> {
    let output = apply_transfer(image.view(), transfer, detection)?;
    output.image.save(args.output.join(name))?;
    Ok(output.regions.unwrap_or_default())
}

use std::sync::Arc;

use dicom_reconstruction::{
    ColorOpacityFunction, CrosshairSession, CuttingPlane, DecodedSlice, Interpolation,
    ModalityProfile, Orientation, ProjectionEngine, RasterSize, ReconstructionError, Reduction,
    RegionDetection, RenderOptions, ResampleOptions, Resampler, SessionId, SessionRegistry,
    SliceGeometry, TransferFunctionConfig, ViewDirection, Volume, VolumeAssembler, VolumeRenderer,
    WindowPreset, apply_transfer, invert,
};
use glam::DVec3;
use ndarray::{Array2, Axis};

const COLUMNS: usize = 5;
const ROWS: usize = 4;
const SLICES: usize = 6;
const BRIGHT: (usize, usize, usize) = (3, 1, 4);

fn slice_at(z: usize, value: impl Fn(usize, usize) -> u16) -> DecodedSlice {
    let pixels = Array2::from_shape_fn((ROWS, COLUMNS), |(row, col)| value(row, col));
    let geometry = SliceGeometry::axial(10.0 + 2.0 * z as f64, ROWS, COLUMNS, (0.5, 0.5))
        .with_instance_index(z as i32 + 1);
    DecodedSlice::new(pixels, geometry)
}

fn bright_voxel_slices() -> Vec<DecodedSlice> {
    let (bx, by, bz) = BRIGHT;
    (0..SLICES)
        .map(|z| slice_at(z, |row, col| if (col, row, z) == (bx, by, bz) { 1000 } else { 0 }))
        .collect()
}

fn assemble(slices: Vec<DecodedSlice>) -> Volume {
    VolumeAssembler::default().assemble(slices).unwrap()
}

#[test]
fn reverse_order_assembles_the_same_volume() {
    let forward = assemble(bright_voxel_slices());
    let mut reversed_slices = bright_voxel_slices();
    reversed_slices.reverse();
    let reversed = assemble(reversed_slices);

    assert_eq!(forward.data(), reversed.data());
    assert_eq!(forward.origin(), reversed.origin());
    assert_eq!(forward.spacing(), reversed.spacing());
    assert_eq!(forward.dimensions(), (COLUMNS, ROWS, SLICES));
}

#[test]
fn bright_voxel_lands_where_the_transform_predicts() {
    let volume = assemble(bright_voxel_slices());
    let (bx, by, bz) = BRIGHT;
    let voxel = DVec3::new(bx as f64, by as f64, bz as f64);
    let world = volume.voxel_to_world(voxel);
    assert_eq!(volume.world_to_voxel(world), voxel);

    let options = ResampleOptions {
        interpolation: Interpolation::Nearest,
        background: 0.0,
    };
    let expected = [
        (Orientation::Axial, (bx, by)),
        (Orientation::Coronal, (bx, bz)),
        (Orientation::Sagittal, (by, bz)),
    ];
    for (orientation, (col, row)) in expected {
        let (image, mapping) =
            Resampler::reslice_orthogonal(&volume, orientation, world, RasterSize::Native, options)
                .unwrap();
        let (mapped_col, mapped_row) = mapping.to_viewport(world);
        assert!((mapped_col - col as f64).abs() < 1e-9, "{orientation}");
        assert!((mapped_row - row as f64).abs() < 1e-9, "{orientation}");
        assert_eq!(image[[row, col]], 1000.0, "{orientation}");
        assert_eq!(image.sum(), 1000.0, "{orientation}");
    }
}

#[test]
fn isotropic_planes_have_square_pixels() {
    let volume = assemble(bright_voxel_slices());
    for orientation in Orientation::ALL {
        let (image, mapping) = Resampler::reslice_orthogonal(
            &volume,
            orientation,
            volume.center(),
            RasterSize::Isotropic,
            ResampleOptions::default(),
        )
        .unwrap();
        assert_eq!(image.dim(), (mapping.height, mapping.width));
        assert!(
            (mapping.u_step - mapping.v_step).abs() < 1e-12,
            "{orientation}: {} x {}",
            mapping.u_step,
            mapping.v_step
        );
    }
}

#[test]
fn reslicing_does_not_depend_on_thread_count() {
    let volume = assemble(bright_voxel_slices());
    let plane = CuttingPlane::oblique(volume.center(), DVec3::new(1.0, 2.0, 3.0)).unwrap();
    let reslice = || {
        Resampler::reslice(&volume, &plane, (23, 17), ResampleOptions::default()).unwrap()
    };

    let single = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .unwrap()
        .install(reslice);
    assert_eq!(single, reslice());
}

#[test]
fn max_projection_of_increasing_volume_is_the_last_slice() {
    let slices = (0..SLICES)
        .map(|z| slice_at(z, |row, col| (z * 100 + row * 7 + col) as u16))
        .collect();
    let volume = assemble(slices);
    let projections = ProjectionEngine::project(&volume, Reduction::Max, None);
    let last = volume.data().index_axis(Axis(0), SLICES - 1);
    assert_eq!(projections.axial, last);
}

#[test]
fn constant_slices_project_to_average_and_max() {
    let slices = (0..4)
        .map(|z| {
            let geometry = SliceGeometry::axial(z as f64, 4, 4, (1.0, 1.0));
            DecodedSlice::new(Array2::from_elem((4, 4), z as u16), geometry)
        })
        .collect();
    let volume = assemble(slices);

    let average = ProjectionEngine::project(&volume, Reduction::Average, None);
    assert!(average.axial.iter().all(|&v| v == 1.5));
    let max = ProjectionEngine::project(&volume, Reduction::Max, None);
    assert!(max.axial.iter().all(|&v| v == 3.0));
    assert_eq!(max.axial.dim(), (4, 4));
}

#[test]
fn inverting_twice_is_the_identity() {
    for value in 0..=u8::MAX {
        assert_eq!(invert(invert(value)), value);
    }

    let image = Array2::from_shape_fn((8, 8), |(row, col)| (row * 100) as f32 - col as f32 * 30.0);
    for config in [
        TransferFunctionConfig::from_preset(WindowPreset::Lung),
        TransferFunctionConfig::new(300.0, 1500.0, ModalityProfile::CtBone { threshold: 200.0 }),
        TransferFunctionConfig::new(300.0, 600.0, ModalityProfile::PetSuv {
            policy: dicom_reconstruction::RegionPolicy::hotspots(),
        }),
    ] {
        let plain = apply_transfer(image.view(), &config, RegionDetection::Skip).unwrap();
        let twice =
            apply_transfer(image.view(), &config.inverted().inverted(), RegionDetection::Skip)
                .unwrap();
        assert_eq!(plain.image.as_raw(), twice.image.as_raw());
    }
}

#[test]
fn invalid_window_fails_before_any_work() {
    let image = Array2::<f32>::zeros((2, 2));
    let config = TransferFunctionConfig::new(0.0, 0.0, ModalityProfile::GenericLinear);
    let result = apply_transfer(image.view(), &config, RegionDetection::Skip);
    assert!(matches!(result, Err(ReconstructionError::InvalidConfig(_))));
}

#[test]
fn transparent_render_is_pure_background() {
    let volume = assemble(bright_voxel_slices());
    let options = RenderOptions {
        background: [12, 34, 56],
        ..RenderOptions::default()
    };
    for view in [
        ViewDirection::Principal(Orientation::Sagittal),
        ViewDirection::Arbitrary(DVec3::new(-1.0, 0.5, 2.0)),
    ] {
        let image =
            VolumeRenderer::render(&volume, &ColorOpacityFunction::transparent(), view, options)
                .unwrap();
        assert!(image.pixels().all(|p| p.0 == [12, 34, 56]));
    }
}

#[test]
fn flat_spacing_is_refused_before_rendering() {
    let data = ndarray::Array3::<f32>::zeros((2, 2, 2));
    let result = Volume::new(data.clone(), (1.0, 1.0, 0.0));
    assert!(matches!(result, Err(ReconstructionError::InvalidConfig(_))));

    let volume = Volume::new(data, (1.0, 1.0, 1.0)).unwrap();
    let image = VolumeRenderer::render(
        &volume,
        &ColorOpacityFunction::bone(200.0),
        ViewDirection::Principal(Orientation::Coronal),
        RenderOptions::default(),
    )
    .unwrap();
    assert_eq!(image.dimensions(), (2, 2));
}

#[test]
fn too_few_slices_is_insufficient_data() {
    let mut slices = bright_voxel_slices();
    slices.truncate(1);
    let result = VolumeAssembler::default().assemble(slices);
    assert!(matches!(
        result,
        Err(ReconstructionError::InsufficientData { slices: 1 })
    ));
}

#[test]
fn mismatched_slice_dimensions_are_rejected() {
    let mut slices = bright_voxel_slices();
    let odd = SliceGeometry::axial(100.0, ROWS + 1, COLUMNS, (0.5, 0.5));
    slices.push(DecodedSlice::new(Array2::<u16>::zeros((ROWS + 1, COLUMNS)), odd));
    let result = VolumeAssembler::default().assemble(slices);
    assert!(matches!(result, Err(ReconstructionError::GeometryMismatch(_))));
}

#[tokio::test]
async fn crosshair_update_recomputes_only_the_other_planes() {
    let volume = Arc::new(assemble(bright_voxel_slices()));
    let registry = SessionRegistry::new();
    let id = SessionId::new("viewer-1");
    let session =
        CrosshairSession::new(volume, RasterSize::Isotropic, ResampleOptions::default()).unwrap();
    registry.open(id.clone(), session).await;

    for plane in Orientation::ALL {
        let update = registry.crosshair_update(&id, plane, (1.0, 2.0)).await.unwrap();
        assert!(update.images.get(plane).is_none());
        assert_eq!(update.recomputed().count(), 2);
        assert!(update.recomputed().all(|(orientation, _)| orientation != plane));
        for (_, overlay) in update.overlays.iter() {
            assert!(overlay.col.is_finite() && overlay.row.is_finite());
        }
    }

    let session = registry.session(&id).await.unwrap();
    assert_eq!(
        session.lock().await.interaction(),
        dicom_reconstruction::InteractionState::Locked(Orientation::Sagittal)
    );
}

#[tokio::test]
async fn sessions_do_not_share_crosshairs() {
    let volume = Arc::new(assemble(bright_voxel_slices()));
    let registry = SessionRegistry::new();
    for name in ["a", "b"] {
        let session = CrosshairSession::new(
            Arc::clone(&volume),
            RasterSize::Native,
            ResampleOptions::default(),
        )
        .unwrap();
        registry.open(SessionId::new(name), session).await;
    }

    let moved = registry
        .crosshair_update(&SessionId::new("a"), Orientation::Axial, (0.0, 0.0))
        .await
        .unwrap();
    let untouched = registry.session(&SessionId::new("b")).await.unwrap();
    assert_ne!(moved.state, untouched.lock().await.state());
}

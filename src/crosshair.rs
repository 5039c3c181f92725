//! Shared 3D cursor across the three orthogonal views.
//!
//! A [`CrosshairSession`] owns the cursor of one viewer looking at one
//! volume. Sessions are kept apart in a [`SessionRegistry`]; each session
//! sits behind its own mutex so updates to it never interleave, while
//! different sessions run independently.

use std::{collections::HashMap, fmt, sync::Arc};

use glam::DVec3;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::{
    enums::Orientation,
    error::{ReconstructionError, Result},
    resampler::{CuttingPlane, PlaneMapping, RasterSize, ResampleOptions, Resampler},
    volume::Volume,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Cursor position as a percentage (0 to 100) along the voxel x, y and z axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrosshairState {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for CrosshairState {
    fn default() -> Self {
        Self::centered()
    }
}

impl CrosshairState {
    pub fn centered() -> Self {
        Self {
            x: 50.0,
            y: 50.0,
            z: 50.0,
        }
    }

    /// Percentages outside 0..=100 are clamped.
    pub fn from_percent(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: clamp_percent(x, "x"),
            y: clamp_percent(y, "y"),
            z: clamp_percent(z, "z"),
        }
    }

    fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    fn from_array([x, y, z]: [f64; 3]) -> Self {
        Self::from_percent(x, y, z)
    }

    /// Continuous voxel coordinates of the cursor.
    pub fn to_voxel(&self, volume: &Volume) -> DVec3 {
        let (nx, ny, nz) = volume.dimensions();
        let along = |percent: f64, n: usize| percent / 100.0 * n.saturating_sub(1) as f64;
        DVec3::new(along(self.x, nx), along(self.y, ny), along(self.z, nz))
    }

    pub fn from_voxel(volume: &Volume, voxel: DVec3) -> Self {
        let (nx, ny, nz) = volume.dimensions();
        let percent = |coord: f64, n: usize| {
            if n > 1 {
                coord / (n - 1) as f64 * 100.0
            } else {
                0.0
            }
        };
        Self::from_percent(percent(voxel.x, nx), percent(voxel.y, ny), percent(voxel.z, nz))
    }

    pub fn to_world(&self, volume: &Volume) -> DVec3 {
        volume.voxel_to_world(self.to_voxel(volume))
    }

    pub fn from_world(volume: &Volume, world: DVec3) -> Self {
        Self::from_voxel(volume, volume.world_to_voxel(world))
    }
}

fn clamp_percent(value: f64, axis: &str) -> f64 {
    let clamped = if value.is_nan() { 50.0 } else { value.clamp(0.0, 100.0) };
    if clamped != value {
        debug!(axis, value, clamped, "crosshair coordinate clamped");
    }
    clamped
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "plane", rename_all = "lowercase")]
pub enum InteractionState {
    #[default]
    Idle,
    /// Pointer moving over a plane; only the preview cursor follows it.
    Hover(Orientation),
    /// A click committed a new cursor position on a plane.
    Locked(Orientation),
}

/// One value per orthogonal plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaneSet<T> {
    pub axial: T,
    pub coronal: T,
    pub sagittal: T,
}

impl<T> PlaneSet<T> {
    pub fn from_fn(mut f: impl FnMut(Orientation) -> T) -> Self {
        Self {
            axial: f(Orientation::Axial),
            coronal: f(Orientation::Coronal),
            sagittal: f(Orientation::Sagittal),
        }
    }

    pub fn try_from_fn(mut f: impl FnMut(Orientation) -> Result<T>) -> Result<Self> {
        Ok(Self {
            axial: f(Orientation::Axial)?,
            coronal: f(Orientation::Coronal)?,
            sagittal: f(Orientation::Sagittal)?,
        })
    }

    pub fn get(&self, orientation: Orientation) -> &T {
        match orientation {
            Orientation::Axial => &self.axial,
            Orientation::Coronal => &self.coronal,
            Orientation::Sagittal => &self.sagittal,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Orientation, &T)> {
        Orientation::ALL.into_iter().map(move |o| (o, self.get(o)))
    }
}

/// Where the cursor cross sits in one view, in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrosshairOverlay {
    pub col: f64,
    pub row: f64,
}

/// Answer to a committed click on `plane`.
#[derive(Debug, Clone, PartialEq)]
pub struct CrosshairUpdate {
    pub plane: Orientation,
    pub state: CrosshairState,
    /// Resliced images; the clicked plane is `None` since it already shows
    /// the new position.
    pub images: PlaneSet<Option<Array2<f32>>>,
    pub overlays: PlaneSet<CrosshairOverlay>,
}

impl CrosshairUpdate {
    pub fn recomputed(&self) -> impl Iterator<Item = (Orientation, &Array2<f32>)> {
        self.images
            .iter()
            .filter_map(|(orientation, image)| image.as_ref().map(|image| (orientation, image)))
    }
}

pub struct CrosshairSession {
    volume: Arc<Volume>,
    state: CrosshairState,
    interaction: InteractionState,
    preview: Option<CrosshairState>,
    raster: RasterSize,
    options: ResampleOptions,
}

impl CrosshairSession {
    /// Session with the cursor in the centre of `volume`.
    pub fn new(volume: Arc<Volume>, raster: RasterSize, options: ResampleOptions) -> Result<Self> {
        for orientation in Orientation::ALL {
            let (width, height) = raster.resolve(&volume, orientation);
            if width == 0 || height == 0 {
                return Err(ReconstructionError::invalid_config(format!(
                    "{orientation} raster must be non-empty, got {width}x{height}"
                )));
            }
        }
        Ok(Self {
            volume,
            state: CrosshairState::centered(),
            interaction: InteractionState::Idle,
            preview: None,
            raster,
            options,
        })
    }

    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    pub fn state(&self) -> CrosshairState {
        self.state
    }

    pub fn interaction(&self) -> InteractionState {
        self.interaction
    }

    pub fn preview(&self) -> Option<CrosshairState> {
        self.preview
    }

    /// Viewport mapping of `orientation` with the plane through `state`.
    pub fn mapping(&self, orientation: Orientation, state: CrosshairState) -> Result<PlaneMapping> {
        let origin = state.to_world(&self.volume);
        let plane = CuttingPlane::orthogonal(&self.volume, orientation, origin);
        let (width, height) = self.raster.resolve(&self.volume, orientation);
        PlaneMapping::fit(&self.volume, &plane, width, height)
    }

    /// All three planes at the current cursor.
    pub fn render_all(&self) -> Result<PlaneSet<Array2<f32>>> {
        PlaneSet::try_from_fn(|orientation| self.reslice(orientation, self.state))
    }

    pub fn overlays(&self, state: CrosshairState) -> Result<PlaneSet<CrosshairOverlay>> {
        let world = state.to_world(&self.volume);
        PlaneSet::try_from_fn(|orientation| {
            let mapping = self.mapping(orientation, state)?;
            let (col, row) = mapping.to_viewport(world);
            let (col, row) = mapping.clamp(col, row);
            Ok(CrosshairOverlay { col, row })
        })
    }

    /// Moves the preview cursor only; no plane is resliced.
    pub fn hover(
        &mut self,
        plane: Orientation,
        viewport: (f64, f64),
    ) -> Result<PlaneSet<CrosshairOverlay>> {
        let preview = self.state_at(plane, viewport)?;
        self.transition(InteractionState::Hover(plane));
        self.preview = Some(preview);
        self.overlays(preview)
    }

    /// Commits a click on `plane` and reslices the two other planes.
    pub fn lock(&mut self, plane: Orientation, viewport: (f64, f64)) -> Result<CrosshairUpdate> {
        let state = self.state_at(plane, viewport)?;
        let overlays = self.overlays(state)?;
        let images = PlaneSet::try_from_fn(|orientation| {
            if orientation == plane {
                Ok(None)
            } else {
                self.reslice(orientation, state).map(Some)
            }
        })?;

        self.transition(InteractionState::Locked(plane));
        self.state = state;
        self.preview = None;
        Ok(CrosshairUpdate {
            plane,
            state,
            images,
            overlays,
        })
    }

    /// Pointer left the views.
    pub fn leave(&mut self) {
        self.transition(InteractionState::Idle);
        self.preview = None;
    }

    /// Cursor after pointing at `viewport` on `plane`. Only the two in-plane
    /// axes move; the coordinate along the plane normal is kept.
    fn state_at(&self, plane: Orientation, (col, row): (f64, f64)) -> Result<CrosshairState> {
        if !col.is_finite() || !row.is_finite() {
            return Err(ReconstructionError::invalid_config(format!(
                "viewport coordinate must be finite, got ({col}, {row})"
            )));
        }
        let mapping = self.mapping(plane, self.state)?;
        let (clamped_col, clamped_row) = mapping.clamp(col, row);
        if (clamped_col, clamped_row) != (col, row) {
            debug!(%plane, col, row, "viewport coordinate clamped onto the raster");
        }
        let world = mapping.to_world(clamped_col, clamped_row);
        let picked = CrosshairState::from_world(&self.volume, world).as_array();

        let mut next = self.state.as_array();
        let (u, v) = plane.in_plane_axes();
        next[u] = picked[u];
        next[v] = picked[v];
        Ok(CrosshairState::from_array(next))
    }

    fn reslice(&self, orientation: Orientation, state: CrosshairState) -> Result<Array2<f32>> {
        let mapping = self.mapping(orientation, state)?;
        Ok(Resampler::reslice_mapping(&self.volume, &mapping, self.options))
    }

    fn transition(&mut self, next: InteractionState) {
        if self.interaction != next {
            debug!(from = ?self.interaction, to = ?next, "crosshair interaction");
            self.interaction = next;
        }
    }
}

/// Crosshair sessions keyed by id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<CrosshairSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session`, replacing any session already using `id`.
    pub async fn open(&self, id: SessionId, session: CrosshairSession) {
        debug!(session = %id, "opening crosshair session");
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(session)));
    }

    /// Drops the session; its volume is freed once no request holds it.
    pub async fn close(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            debug!(session = %id, "closed crosshair session");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn session(&self, id: &SessionId) -> Result<Arc<Mutex<CrosshairSession>>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ReconstructionError::UnknownSession(id.clone()))
    }

    pub async fn hover(
        &self,
        id: &SessionId,
        plane: Orientation,
        viewport: (f64, f64),
    ) -> Result<PlaneSet<CrosshairOverlay>> {
        let session = self.session(id).await?;
        let mut session = session.lock().await;
        session.hover(plane, viewport)
    }

    /// Commits a click on `plane` of session `id`. The session stays locked
    /// for the whole read-modify-write of its cursor.
    pub async fn crosshair_update(
        &self,
        id: &SessionId,
        plane: Orientation,
        viewport: (f64, f64),
    ) -> Result<CrosshairUpdate> {
        let session = self.session(id).await?;
        let mut session = session.lock().await;
        session.lock(plane, viewport)
    }
}

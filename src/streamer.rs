//! Chunk streaming around a moving viewer
//!
//! Maintains the set of terrain chunks near the viewer, picks a level of
//! detail per chunk from distance thresholds, and requests height maps and
//! meshes through the background work queue. All chunk state lives on the
//! thread that calls [`TerrainStreamer::tick`]; workers only ever compute
//! values from immutable inputs.
//!
//! Chunks outside the view radius are kept, not destroyed: memory grows with
//! the explored area. Stale work for chunks that left view still completes
//! and is applied on the next tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::height_map::{generate_height_map, HeightMap, HeightMapSettings};
use crate::mesh::{generate_chunk_mesh, MeshSettings, TerrainMesh, NUM_SUPPORTED_LODS};
use crate::work_queue::WorkQueue;

/// Re-scan chunk visibility only after the viewer moved this far.
const VIEWER_MOVE_THRESHOLD_FOR_CHUNK_UPDATE: f32 = 25.0;
const SQR_VIEWER_MOVE_THRESHOLD_FOR_CHUNK_UPDATE: f32 =
    VIEWER_MOVE_THRESHOLD_FOR_CHUNK_UPDATE * VIEWER_MOVE_THRESHOLD_FOR_CHUNK_UPDATE;

/// Distance at which a ready collider mesh is attached to the chunk.
const COLLIDER_GENERATION_DISTANCE_THRESHOLD: f32 = 5.0;

/// Integer chunk coordinate on the infinite chunk lattice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

impl ChunkCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The chunk containing a world position (nearest-integer rounding).
    pub fn from_world(position: Vec2, chunk_world_size: f32) -> Self {
        Self {
            x: (position.x / chunk_world_size).round() as i32,
            y: (position.y / chunk_world_size).round() as i32,
        }
    }

    pub fn as_vec2(&self) -> Vec2 {
        Vec2::new(self.x as f32, self.y as f32)
    }
}

/// Axis-aligned box in the ground plane, used for viewer distance tests.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub center: Vec2,
    pub extents: Vec2,
}

impl Bounds {
    pub fn new(center: Vec2, size: Vec2) -> Self {
        Self {
            center,
            extents: size / 2.0,
        }
    }

    /// Squared distance from `point` to the nearest point of the box;
    /// zero inside.
    pub fn sqr_distance(&self, point: Vec2) -> f32 {
        let delta = (point - self.center).abs() - self.extents;
        let clamped = delta.max(Vec2::ZERO);
        clamped.length_squared()
    }
}

/// One supported level of detail: the simplification level and the viewer
/// distance up to which it is used. Entries are ordered by ascending
/// threshold; the last threshold is the maximum view distance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LodInfo {
    pub lod: usize,
    pub visible_dst_threshold: f32,
}

impl LodInfo {
    pub fn sqr_visible_dst_threshold(&self) -> f32 {
        self.visible_dst_threshold * self.visible_dst_threshold
    }
}

/// State changes produced by a [`TerrainStreamer::tick`], consumed by the
/// rendering and physics layers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StreamerEvent {
    VisibilityChanged { coord: ChunkCoord, visible: bool },
    ColliderReady { coord: ChunkCoord },
}

/// Cached mesh for one LOD level. `has_requested` is the single-shot dedup
/// flag: the first request for a (height map, LOD) pair is authoritative.
#[derive(Debug, Default)]
struct LodMesh {
    lod: usize,
    has_requested: bool,
    mesh: Option<Arc<TerrainMesh>>,
}

impl LodMesh {
    fn new(lod: usize) -> Self {
        Self {
            lod,
            has_requested: false,
            mesh: None,
        }
    }
}

/// One streamed terrain chunk. Created by the streamer when the viewer first
/// comes near, never shared across chunks.
#[derive(Debug)]
pub struct TerrainChunk {
    coord: ChunkCoord,
    bounds: Bounds,
    sample_center: Vec2,
    height_map: Option<Arc<HeightMap>>,
    lod_meshes: Vec<LodMesh>,
    previous_lod_index: Option<usize>,
    visible: bool,
    has_set_collider: bool,
    collider_lod_index: usize,
}

impl TerrainChunk {
    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// World-space footprint of the chunk.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Noise-space center this chunk's height map is sampled around.
    pub fn sample_center(&self) -> Vec2 {
        self.sample_center
    }

    pub fn height_map(&self) -> Option<&Arc<HeightMap>> {
        self.height_map.as_ref()
    }

    /// The mesh for the chunk's current display LOD, if generated. While a
    /// newly selected LOD is still pending this keeps returning the previous
    /// mesh, so the chunk never pops to empty.
    pub fn mesh(&self) -> Option<&Arc<TerrainMesh>> {
        let index = self.previous_lod_index?;
        self.lod_meshes[index].mesh.as_ref()
    }

    /// The collision mesh, once attached. Attached exactly once; never
    /// replaced afterwards.
    pub fn collider_mesh(&self) -> Option<&Arc<TerrainMesh>> {
        if !self.has_set_collider {
            return None;
        }
        self.lod_meshes[self.collider_lod_index].mesh.as_ref()
    }
}

/// Result of one background generation job.
enum ChunkWork {
    HeightMap {
        coord: ChunkCoord,
        height_map: HeightMap,
    },
    Mesh {
        coord: ChunkCoord,
        lod_index: usize,
        mesh: TerrainMesh,
    },
}

/// Streams terrain chunks around a viewer.
///
/// Drive it by calling [`tick`](Self::tick) once per frame from a single
/// thread; the returned events tell the renderer which chunks to show or hide
/// and the physics layer which colliders became available.
pub struct TerrainStreamer {
    height_map_settings: HeightMapSettings,
    mesh_settings: MeshSettings,
    detail_levels: Vec<LodInfo>,
    collider_lod_index: usize,
    max_view_dst: f32,
    mesh_world_size: f32,
    chunks_visible_in_view_dst: i32,
    chunks: HashMap<ChunkCoord, TerrainChunk>,
    visible_chunks: HashSet<ChunkCoord>,
    queue: WorkQueue<ChunkWork>,
    viewer_position: Vec2,
    viewer_position_old: Option<Vec2>,
}

impl TerrainStreamer {
    /// Create a streamer.
    ///
    /// Panics if `detail_levels` is empty, not ascending by threshold, names
    /// an unsupported LOD, or if `collider_lod_index` is out of range; these
    /// are configuration programming errors, not runtime conditions.
    pub fn new(
        height_map_settings: HeightMapSettings,
        mesh_settings: MeshSettings,
        detail_levels: Vec<LodInfo>,
        collider_lod_index: usize,
        num_threads: usize,
    ) -> Self {
        assert!(!detail_levels.is_empty(), "at least one detail level required");
        assert!(
            detail_levels
                .windows(2)
                .all(|w| w[0].visible_dst_threshold < w[1].visible_dst_threshold),
            "detail level thresholds must be ascending"
        );
        assert!(
            detail_levels.iter().all(|d| d.lod < NUM_SUPPORTED_LODS),
            "detail level names an unsupported lod"
        );
        assert!(
            collider_lod_index < detail_levels.len(),
            "collider lod index {} out of range",
            collider_lod_index
        );

        let max_view_dst = detail_levels[detail_levels.len() - 1].visible_dst_threshold;
        let mesh_world_size = mesh_settings.mesh_world_size();
        let chunks_visible_in_view_dst = (max_view_dst / mesh_world_size).round() as i32;

        debug!(
            max_view_dst,
            mesh_world_size, chunks_visible_in_view_dst, "terrain streamer created"
        );

        Self {
            height_map_settings,
            mesh_settings,
            detail_levels,
            collider_lod_index,
            max_view_dst,
            mesh_world_size,
            chunks_visible_in_view_dst,
            chunks: HashMap::new(),
            visible_chunks: HashSet::new(),
            queue: WorkQueue::new(num_threads),
            viewer_position: Vec2::ZERO,
            viewer_position_old: None,
        }
    }

    /// Advance streaming state for the given viewer position (x, z in world
    /// units). Applies completed background work, refreshes collision meshes
    /// when the viewer moved, and re-scans chunk visibility when it moved
    /// beyond the update threshold. Call exactly once per frame.
    pub fn tick(&mut self, viewer_position: Vec2) -> Vec<StreamerEvent> {
        self.viewer_position = viewer_position;
        let mut events = Vec::new();

        for work in self.queue.drain() {
            self.apply_work(work, &mut events);
        }

        if self.viewer_position_old != Some(viewer_position) {
            for coord in self.visible_chunks.clone() {
                self.update_collision_mesh(coord, &mut events);
            }
        }

        let moved_far = match self.viewer_position_old {
            None => true,
            Some(old) => {
                (old - viewer_position).length_squared()
                    > SQR_VIEWER_MOVE_THRESHOLD_FOR_CHUNK_UPDATE
            }
        };
        if moved_far {
            self.viewer_position_old = Some(viewer_position);
            self.update_visible_chunks(&mut events);
        }

        events
    }

    /// All chunks created so far, visible or not.
    pub fn chunks(&self) -> impl Iterator<Item = &TerrainChunk> {
        self.chunks.values()
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&TerrainChunk> {
        self.chunks.get(&coord)
    }

    /// The incrementally maintained set of currently visible chunks.
    pub fn visible_chunks(&self) -> impl Iterator<Item = &TerrainChunk> {
        self.visible_chunks.iter().filter_map(|c| self.chunks.get(c))
    }

    fn apply_work(&mut self, work: ChunkWork, events: &mut Vec<StreamerEvent>) {
        match work {
            ChunkWork::HeightMap { coord, height_map } => {
                trace!(?coord, "height map received");
                if let Some(chunk) = self.chunks.get_mut(&coord) {
                    chunk.height_map = Some(Arc::new(height_map));
                }
                self.update_chunk(coord, events);
            }
            ChunkWork::Mesh {
                coord,
                lod_index,
                mesh,
            } => {
                trace!(?coord, lod_index, "mesh received");
                if let Some(chunk) = self.chunks.get_mut(&coord) {
                    chunk.lod_meshes[lod_index].mesh = Some(Arc::new(mesh));
                }
                self.update_chunk(coord, events);
                if lod_index == self.collider_lod_index {
                    self.update_collision_mesh(coord, events);
                }
            }
        }
    }

    /// Ensure chunks exist in a square radius around the viewer and refresh
    /// visibility and LOD selection for every candidate.
    fn update_visible_chunks(&mut self, events: &mut Vec<StreamerEvent>) {
        let mut already_updated: HashSet<ChunkCoord> = HashSet::new();
        for coord in self.visible_chunks.clone() {
            already_updated.insert(coord);
            self.update_chunk(coord, events);
        }

        let current = ChunkCoord::from_world(self.viewer_position, self.mesh_world_size);
        let radius = self.chunks_visible_in_view_dst;
        for y_offset in -radius..=radius {
            for x_offset in -radius..=radius {
                let coord = ChunkCoord::new(current.x + x_offset, current.y + y_offset);
                if already_updated.contains(&coord) {
                    continue;
                }
                if self.chunks.contains_key(&coord) {
                    self.update_chunk(coord, events);
                } else {
                    self.load_chunk(coord);
                }
            }
        }
    }

    /// Create a chunk and request its height map.
    fn load_chunk(&mut self, coord: ChunkCoord) {
        let position = coord.as_vec2() * self.mesh_world_size;
        let sample_center = position / self.mesh_settings.mesh_scale;
        let bounds = Bounds::new(position, Vec2::splat(self.mesh_world_size));

        let chunk = TerrainChunk {
            coord,
            bounds,
            sample_center,
            height_map: None,
            lod_meshes: self.detail_levels.iter().map(|d| LodMesh::new(d.lod)).collect(),
            previous_lod_index: None,
            visible: false,
            has_set_collider: false,
            collider_lod_index: self.collider_lod_index,
        };

        debug!(?coord, "loading chunk");
        let num_verts = self.mesh_settings.num_verts_per_line();
        let settings = self.height_map_settings.clone();
        self.queue.submit(move || ChunkWork::HeightMap {
            coord,
            height_map: generate_height_map(num_verts, num_verts, &settings, sample_center),
        });

        self.chunks.insert(coord, chunk);
    }

    /// Recompute a chunk's visibility and display LOD, requesting mesh
    /// generation where needed and recording visibility toggles.
    fn update_chunk(&mut self, coord: ChunkCoord, events: &mut Vec<StreamerEvent>) {
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return;
        };
        // Nothing to decide until the height map arrives.
        let Some(height_map) = chunk.height_map.clone() else {
            return;
        };

        let distance = chunk.bounds.sqr_distance(self.viewer_position).sqrt();
        let was_visible = chunk.visible;
        let visible = distance <= self.max_view_dst;

        if visible {
            let lod_index = select_lod_index(&self.detail_levels, distance);
            if Some(lod_index) != chunk.previous_lod_index {
                let lod_mesh = &mut chunk.lod_meshes[lod_index];
                if lod_mesh.mesh.is_some() {
                    chunk.previous_lod_index = Some(lod_index);
                } else if !lod_mesh.has_requested {
                    lod_mesh.has_requested = true;
                    let lod = lod_mesh.lod;
                    let flat_shading = self.mesh_settings.use_flat_shading;
                    trace!(?coord, lod_index, "requesting mesh");
                    self.queue.submit(move || ChunkWork::Mesh {
                        coord,
                        lod_index,
                        mesh: generate_chunk_mesh(&height_map.values, lod, flat_shading)
                            .into_mesh(),
                    });
                }
            }
        }

        if was_visible != visible {
            chunk.visible = visible;
            if visible {
                self.visible_chunks.insert(coord);
            } else {
                self.visible_chunks.remove(&coord);
            }
            events.push(StreamerEvent::VisibilityChanged { coord, visible });
        }
    }

    /// Advance the collider track: request the collider-LOD mesh when the
    /// viewer comes near, and attach the first ready mesh exactly once.
    fn update_collision_mesh(&mut self, coord: ChunkCoord, events: &mut Vec<StreamerEvent>) {
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return;
        };
        if chunk.has_set_collider {
            return;
        }
        let Some(height_map) = chunk.height_map.clone() else {
            return;
        };

        let sqr_dst = chunk.bounds.sqr_distance(self.viewer_position);
        let collider_level = &self.detail_levels[self.collider_lod_index];

        if sqr_dst < collider_level.sqr_visible_dst_threshold() {
            let lod_mesh = &mut chunk.lod_meshes[self.collider_lod_index];
            if !lod_mesh.has_requested {
                lod_mesh.has_requested = true;
                let lod = lod_mesh.lod;
                let lod_index = self.collider_lod_index;
                let flat_shading = self.mesh_settings.use_flat_shading;
                trace!(?coord, "requesting collider mesh");
                self.queue.submit(move || ChunkWork::Mesh {
                    coord,
                    lod_index,
                    mesh: generate_chunk_mesh(&height_map.values, lod, flat_shading).into_mesh(),
                });
            }
        }

        let attach_range = COLLIDER_GENERATION_DISTANCE_THRESHOLD
            * COLLIDER_GENERATION_DISTANCE_THRESHOLD;
        if sqr_dst < attach_range && chunk.lod_meshes[self.collider_lod_index].mesh.is_some() {
            chunk.has_set_collider = true;
            debug!(?coord, "collider attached");
            events.push(StreamerEvent::ColliderReady { coord });
        }
    }
}

/// Pick the smallest LOD index whose threshold the distance does not exceed.
/// The last level catches everything up to the maximum view distance.
fn select_lod_index(detail_levels: &[LodInfo], distance: f32) -> usize {
    let mut lod_index = 0;
    for (i, level) in detail_levels[..detail_levels.len() - 1].iter().enumerate() {
        if distance > level.visible_dst_threshold {
            lod_index = i + 1;
        } else {
            break;
        }
    }
    lod_index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::HeightCurve;
    use crate::noise_map::{NoiseSettings, NormalizeMode};
    use std::time::{Duration, Instant};

    fn levels(thresholds: &[f32]) -> Vec<LodInfo> {
        thresholds
            .iter()
            .enumerate()
            .map(|(i, &t)| LodInfo {
                lod: i,
                visible_dst_threshold: t,
            })
            .collect()
    }

    #[test]
    fn test_lod_selection_scans_ascending_thresholds() {
        let levels = levels(&[100.0, 300.0, 600.0]);
        assert_eq!(select_lod_index(&levels, 250.0), 1);
        assert_eq!(select_lod_index(&levels, 50.0), 0);
        assert_eq!(select_lod_index(&levels, 100.0), 0);
        assert_eq!(select_lod_index(&levels, 301.0), 2);
        assert_eq!(select_lod_index(&levels, 599.0), 2);
    }

    #[test]
    fn test_bounds_sqr_distance() {
        let bounds = Bounds::new(Vec2::ZERO, Vec2::splat(10.0));
        assert_eq!(bounds.sqr_distance(Vec2::new(3.0, -2.0)), 0.0);
        assert_eq!(bounds.sqr_distance(Vec2::new(8.0, 0.0)), 9.0);
        assert_eq!(bounds.sqr_distance(Vec2::new(8.0, 9.0)), 25.0);
    }

    #[test]
    fn test_chunk_coord_rounds_to_nearest() {
        assert_eq!(ChunkCoord::from_world(Vec2::new(4.9, -4.9), 10.0), ChunkCoord::new(0, 0));
        assert_eq!(ChunkCoord::from_world(Vec2::new(5.1, 0.0), 10.0), ChunkCoord::new(1, 0));
        assert_eq!(ChunkCoord::from_world(Vec2::new(-5.1, 15.0), 10.0), ChunkCoord::new(-1, 2));
    }

    fn test_streamer(detail_levels: Vec<LodInfo>, collider_lod_index: usize) -> TerrainStreamer {
        let height_map_settings = HeightMapSettings {
            noise: NoiseSettings {
                seed: 42,
                normalize_mode: NormalizeMode::Global,
                ..NoiseSettings::default()
            },
            use_falloff: false,
            height_multiplier: 10.0,
            height_curve: HeightCurve::identity(),
        };
        let mesh_settings = MeshSettings {
            mesh_scale: 3.0,
            ..MeshSettings::default()
        };
        TerrainStreamer::new(
            height_map_settings,
            mesh_settings,
            detail_levels,
            collider_lod_index,
            2,
        )
    }

    #[test]
    #[should_panic(expected = "detail level")]
    fn test_empty_detail_levels_fail_fast() {
        test_streamer(vec![], 0);
    }

    #[test]
    #[should_panic(expected = "ascending")]
    fn test_unordered_thresholds_fail_fast() {
        test_streamer(
            vec![
                LodInfo {
                    lod: 0,
                    visible_dst_threshold: 300.0,
                },
                LodInfo {
                    lod: 1,
                    visible_dst_threshold: 100.0,
                },
            ],
            0,
        );
    }

    #[test]
    #[should_panic(expected = "collider lod index")]
    fn test_collider_index_out_of_range_fails_fast() {
        test_streamer(levels(&[100.0]), 3);
    }

    /// Tick until `predicate` holds, collecting events, with a hard timeout.
    fn tick_until(
        streamer: &mut TerrainStreamer,
        viewer: Vec2,
        predicate: impl Fn(&TerrainStreamer, &[StreamerEvent]) -> bool,
    ) -> Vec<StreamerEvent> {
        let deadline = Instant::now() + Duration::from_secs(20);
        let mut all_events = Vec::new();
        loop {
            all_events.extend(streamer.tick(viewer));
            if predicate(streamer, &all_events) {
                return all_events;
            }
            assert!(Instant::now() < deadline, "timed out; events: {:?}", all_events);
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_chunks_created_in_square_radius() {
        let mut streamer = test_streamer(levels(&[150.0]), 0);
        streamer.tick(Vec2::ZERO);

        // mesh_world_size = 22 * 3 = 66; radius = round(150 / 66) = 2.
        let radius = streamer.chunks_visible_in_view_dst;
        assert_eq!(radius, 2);
        let side = (2 * radius + 1) as usize;
        assert_eq!(streamer.chunks().count(), side * side);
        assert!(streamer.chunk(ChunkCoord::new(2, -2)).is_some());
        assert!(streamer.chunk(ChunkCoord::new(3, 0)).is_none());
    }

    #[test]
    fn test_chunk_becomes_visible_with_mesh() {
        let mut streamer = test_streamer(levels(&[150.0]), 0);
        let origin = ChunkCoord::new(0, 0);

        let events = tick_until(&mut streamer, Vec2::ZERO, |s, _| {
            s.chunk(origin).map_or(false, |c| c.is_visible() && c.mesh().is_some())
        });

        assert!(events.contains(&StreamerEvent::VisibilityChanged {
            coord: origin,
            visible: true,
        }));

        let chunk = streamer.chunk(origin).unwrap();
        let mesh = chunk.mesh().unwrap();
        let n = streamer.mesh_settings.vertices_per_line(0);
        assert_eq!(mesh.vertices.len(), n * n);
        assert_eq!(mesh.triangles.len() / 3, 2 * (n - 1) * (n - 1));

        let height_map = chunk.height_map().unwrap();
        assert_eq!(height_map.values.width, streamer.mesh_settings.num_verts_per_line());
    }

    #[test]
    fn test_collider_attaches_once_nearby() {
        let mut streamer = test_streamer(levels(&[150.0]), 0);

        let events = tick_until(&mut streamer, Vec2::ZERO, |s, _| {
            s.chunk(ChunkCoord::new(0, 0))
                .map_or(false, |c| c.collider_mesh().is_some())
        });
        assert!(events.contains(&StreamerEvent::ColliderReady {
            coord: ChunkCoord::new(0, 0)
        }));

        // Distant chunks are inside view range but far outside the collider
        // attach distance.
        let far = streamer.chunk(ChunkCoord::new(2, 0)).unwrap();
        assert!(far.collider_mesh().is_none());
    }

    #[test]
    fn test_far_viewer_sees_nothing() {
        let mut streamer = test_streamer(levels(&[150.0]), 0);
        // Let chunks around the origin load and become visible.
        tick_until(&mut streamer, Vec2::ZERO, |s, _| {
            s.chunk(ChunkCoord::new(0, 0)).map_or(false, |c| c.is_visible())
        });

        // Teleport far away: every old chunk leaves view.
        let events = tick_until(&mut streamer, Vec2::new(10_000.0, 0.0), |s, _| {
            s.chunk(ChunkCoord::new(0, 0)).map_or(false, |c| !c.is_visible())
        });
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamerEvent::VisibilityChanged { visible: false, .. })));

        // Old chunks are kept, not destroyed.
        assert!(streamer.chunk(ChunkCoord::new(0, 0)).is_some());
    }
}

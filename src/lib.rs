//! Terrain generation library
//!
//! Layered-noise height maps, LOD-aware chunk meshes with seamless edge
//! normals, and a streamer that maintains the chunks around a moving viewer.

pub mod curve;
pub mod falloff;
pub mod grid;
pub mod height_map;
pub mod mesh;
pub mod noise_map;
pub mod streamer;
pub mod work_queue;

pub use curve::HeightCurve;
pub use height_map::{generate_height_map, HeightMap, HeightMapSettings};
pub use mesh::{generate_terrain_mesh, MeshData, MeshSettings, TerrainMesh};
pub use noise_map::{generate_noise_map, NoiseSettings, NormalizeMode};
pub use streamer::{ChunkCoord, LodInfo, StreamerEvent, TerrainStreamer};

//! Bundled terrain module
//!
//! Generates square height maps from seeded value noise. Generated chunks are
//! kept in a bounded cache so repeated requests are served from executor
//! state. A bound binary resource is used as a material palette.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::error::{ConfigurationError, JobError};
use crate::executor::{ChunkExecutor, ModuleContext};

pub const TERRAIN_ENTRY: &str = "terrain";

const MAX_CHUNK_SIZE: u32 = 256;
const CACHE_CAPACITY: usize = 256;
const WORLD_LIMIT: u32 = 1_000_000;
const OCTAVES: u32 = 3;
/// Noise lattice spacing in cells for the first octave
const BASE_FREQUENCY_CELLS: f64 = 32.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerrainConfig {
    pub seed: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default = "default_base_height")]
    pub base_height: u32,
    #[serde(default = "default_amplitude")]
    pub amplitude: u32,
}

fn default_chunk_size() -> u32 {
    16
}

fn default_base_height() -> u32 {
    64
}

fn default_amplitude() -> u32 {
    32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerrainChunk {
    pub x: i32,
    pub y: i32,
    pub size: u32,
    /// Row-major, `size * size` entries
    pub heights: Vec<u32>,
    pub min: u32,
    pub max: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materials: Option<Vec<u8>>,
    pub cached: bool,
}

pub struct TerrainExecutor {
    config: TerrainConfig,
    palette: Option<Bytes>,
    cache: HashMap<ChunkCoord, TerrainChunk>,
    order: VecDeque<ChunkCoord>,
}

impl ChunkExecutor for TerrainExecutor {
    type Config = TerrainConfig;
    type Job = ChunkCoord;
    type Output = TerrainChunk;

    fn start(module: &ModuleContext) -> Result<(), String> {
        match module.resource() {
            Some(palette) if palette.is_empty() => Err("material palette is empty".to_string()),
            _ => Ok(()),
        }
    }

    fn new(config: TerrainConfig, module: &ModuleContext) -> Result<Self, ConfigurationError> {
        if config.chunk_size == 0 || config.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigurationError::Rejected(format!(
                "chunk_size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, config.chunk_size
            )));
        }

        if config.base_height.checked_add(config.amplitude).is_none() {
            return Err(ConfigurationError::Rejected(
                "base_height + amplitude overflows".to_string(),
            ));
        }

        Ok(Self {
            config,
            palette: module.resource().cloned(),
            cache: HashMap::new(),
            order: VecDeque::new(),
        })
    }

    fn job(&mut self, coord: ChunkCoord) -> Result<TerrainChunk, JobError> {
        if coord.x.unsigned_abs() > WORLD_LIMIT || coord.y.unsigned_abs() > WORLD_LIMIT {
            return Err(JobError::failed_with(
                format!("chunk ({}, {}) is outside the world", coord.x, coord.y),
                serde_json::json!({ "x": coord.x, "y": coord.y, "limit": WORLD_LIMIT }),
            ));
        }

        if let Some(chunk) = self.cache.get(&coord) {
            let mut chunk = chunk.clone();
            chunk.cached = true;
            return Ok(chunk);
        }

        let chunk = self.generate(coord);
        self.remember(coord, chunk.clone());
        Ok(chunk)
    }
}

impl TerrainExecutor {
    fn generate(&self, coord: ChunkCoord) -> TerrainChunk {
        let size = self.config.chunk_size;
        let cells = (size * size) as usize;
        let mut heights = Vec::with_capacity(cells);
        let mut materials = self.palette.as_ref().map(|_| Vec::with_capacity(cells));

        for row in 0..size {
            for col in 0..size {
                let wx = coord.x as i64 * size as i64 + col as i64;
                let wy = coord.y as i64 * size as i64 + row as i64;
                let n = fractal_noise(self.config.seed, wx as f64, wy as f64);

                heights.push(self.config.base_height + (n * self.config.amplitude as f64) as u32);

                if let (Some(palette), Some(materials)) = (&self.palette, materials.as_mut()) {
                    let index = ((n * palette.len() as f64) as usize).min(palette.len() - 1);
                    materials.push(palette[index]);
                }
            }
        }

        let min = heights.iter().copied().min().unwrap_or(self.config.base_height);
        let max = heights.iter().copied().max().unwrap_or(self.config.base_height);

        TerrainChunk {
            x: coord.x,
            y: coord.y,
            size,
            heights,
            min,
            max,
            materials,
            cached: false,
        }
    }

    fn remember(&mut self, coord: ChunkCoord, chunk: TerrainChunk) {
        if self.order.len() >= CACHE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.cache.remove(&oldest);
            }
        }
        self.order.push_back(coord);
        self.cache.insert(coord, chunk);
    }
}

/// Fractal value noise in `[0, 1)`
fn fractal_noise(seed: u64, x: f64, y: f64) -> f64 {
    let mut total = 0.0;
    let mut weight = 1.0;
    let mut norm = 0.0;
    let mut frequency = 1.0 / BASE_FREQUENCY_CELLS;

    for octave in 0..OCTAVES {
        total += value_noise(seed.wrapping_add(octave as u64), x * frequency, y * frequency) * weight;
        norm += weight;
        weight *= 0.5;
        frequency *= 2.0;
    }

    (total / norm).clamp(0.0, 0.999_999)
}

fn value_noise(seed: u64, x: f64, y: f64) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let tx = smoothstep(x - x0);
    let ty = smoothstep(y - y0);
    let (ix, iy) = (x0 as i64, y0 as i64);

    let v00 = lattice(seed, ix, iy);
    let v10 = lattice(seed, ix + 1, iy);
    let v01 = lattice(seed, ix, iy + 1);
    let v11 = lattice(seed, ix + 1, iy + 1);

    let top = v00 + (v10 - v00) * tx;
    let bottom = v01 + (v11 - v01) * tx;
    top + (bottom - top) * ty
}

fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

fn lattice(seed: u64, x: i64, y: i64) -> f64 {
    let hash = splitmix64(seed ^ splitmix64((x as u64) ^ (y as u64).rotate_left(32)));
    (hash >> 11) as f64 / (1u64 << 53) as f64
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

//! CLI utility for baking tile sets and exercising dynamic obstacles

mod scene;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use log::{debug, info};
use tilecache::{AreaFlagsProcess, Lz4Compressor, TileCache, TileCacheParams, TileOwnership, TiledNavMesh};

use scene::{Scene, WATER_AREA};

/// Polygon flag for ground that can be walked on
const FLAG_WALK: u16 = 0x01;
/// Polygon flag for shallow water
const FLAG_SWIM: u16 = 0x02;

/// A CLI utility for the navigation mesh tile cache
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(long, short, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct SceneArgs {
    /// Number of tiles along x
    #[clap(long, default_value = "4")]
    tiles_x: i32,

    /// Number of tiles along z
    #[clap(long, default_value = "4")]
    tiles_y: i32,

    /// Add a bridge over the middle rows, giving those tiles a second layer
    #[clap(long)]
    bridge: bool,

    /// Tile cache parameters as JSON; missing fields take their defaults
    #[clap(long, value_parser)]
    params: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bake the synthetic scene into a tile set file
    Bake {
        #[clap(flatten)]
        scene: SceneArgs,

        /// Output tile set file
        #[clap(long, value_parser)]
        output: PathBuf,
    },

    /// Add and remove obstacles, ticking updates until the cache settles
    Churn {
        #[clap(flatten)]
        scene: SceneArgs,

        /// Load this tile set instead of baking the scene
        #[clap(long, value_parser)]
        input: Option<PathBuf>,

        /// Number of obstacles added per round
        #[clap(long, default_value = "16")]
        obstacles: usize,

        /// Number of add/remove rounds
        #[clap(long, default_value = "3")]
        rounds: usize,
    },

    /// Print the parameters and tile headers of a tile set file
    Inspect {
        /// Tile set file
        #[clap(value_parser)]
        input: PathBuf,

        /// Print parameters as JSON
        #[clap(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match args.command {
        Commands::Bake { scene, output } => bake(&scene, &output),
        Commands::Churn {
            scene,
            input,
            obstacles,
            rounds,
        } => churn(&scene, input.as_deref(), obstacles, rounds),
        Commands::Inspect { input, json } => inspect(&input, json),
    }
}

fn load_params(path: Option<&Path>) -> Result<TileCacheParams> {
    let params = match path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to open params file: {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Failed to parse params file: {}", path.display()))?
        }
        None => TileCacheParams::default(),
    };
    params.validate().map_err(|e| anyhow!("Invalid tile cache parameters: {}", e))?;
    Ok(params)
}

/// Builds a tile cache holding every layer of the synthetic scene
fn bake_cache(args: &SceneArgs) -> Result<(TileCache, Scene)> {
    if args.tiles_x <= 0 || args.tiles_y <= 0 {
        bail!("Scene must have at least one tile, got {}x{}", args.tiles_x, args.tiles_y);
    }
    let scene = Scene {
        tiles_x: args.tiles_x,
        tiles_y: args.tiles_y,
        bridge: args.bridge,
    };

    let mut params = load_params(args.params.as_deref())?;
    let layers_per_tile = if scene.bridge { 2 } else { 1 };
    let needed = (scene.tiles_x * scene.tiles_y * layers_per_tile) as u32;
    if params.max_tiles < needed {
        debug!("Raising max_tiles from {} to {}", params.max_tiles, needed);
        params.max_tiles = needed;
    }

    let start = Instant::now();
    let mut cache = TileCache::new(params.clone())?;
    let mut layers = 0;
    for ty in 0..scene.tiles_y {
        for tx in 0..scene.tiles_x {
            for data in scene.tile_payloads(&params, cache.compressor(), tx, ty)? {
                cache.add_tile(data, TileOwnership::Owned)?;
                layers += 1;
            }
        }
    }

    info!(
        "Baked {}x{} tiles into {} layers in {:.1} ms",
        scene.tiles_x,
        scene.tiles_y,
        layers,
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok((cache, scene))
}

fn bake(args: &SceneArgs, output: &Path) -> Result<()> {
    let (cache, _) = bake_cache(args)?;

    let file = File::create(output).with_context(|| format!("Failed to create output file: {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    cache.save_tile_set(&mut writer)?;

    println!("Saved {} tiles to {}", cache.tile_count(), output.display());
    Ok(())
}

fn load_cache(path: &Path) -> Result<TileCache> {
    let file = File::open(path).with_context(|| format!("Failed to open tile set: {}", path.display()))?;
    TileCache::load_tile_set(&mut BufReader::new(file), Box::new(Lz4Compressor))
        .with_context(|| format!("Failed to load tile set: {}", path.display()))
}

/// Ticks the cache until it reports no pending work, returning the tick count
fn settle(cache: &mut TileCache, navmesh: &mut TiledNavMesh) -> Result<usize> {
    let mut ticks = 0;
    loop {
        ticks += 1;
        if cache.update(navmesh)? {
            return Ok(ticks);
        }
    }
}

fn churn(args: &SceneArgs, input: Option<&Path>, obstacles: usize, rounds: usize) -> Result<()> {
    let (mut cache, scene) = match input {
        Some(path) => {
            let cache = load_cache(path)?;
            // Tile extent of a loaded set comes from its headers.
            let (tiles_x, tiles_y) = (0..cache.tile_capacity())
                .filter_map(|i| cache.get_tile(i).and_then(|t| t.header()))
                .fold((0, 0), |(w, h), hd| (w.max(hd.tx + 1), h.max(hd.ty + 1)));
            let scene = Scene {
                tiles_x,
                tiles_y,
                bridge: false,
            };
            (cache, scene)
        }
        None => bake_cache(args)?,
    };

    cache.set_mesh_process(Box::new(
        AreaFlagsProcess::new(FLAG_WALK).with_area(WATER_AREA, FLAG_SWIM),
    ));

    let mut navmesh = TiledNavMesh::new(cache.params().max_tiles as usize);
    let start = Instant::now();
    for ty in 0..scene.tiles_y {
        for tx in 0..scene.tiles_x {
            cache.build_nav_mesh_tiles_at(tx, ty, &mut navmesh)?;
        }
    }
    println!(
        "Initial navmesh: {} tiles, {} polygons ({:.1} ms)",
        navmesh.tile_count(),
        navmesh.poly_count(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    let (bmin, bmax) = scene.bounds(cache.params());
    let extent = bmax - bmin;
    let radius = cache.params().cs * 3.0;

    for round in 0..rounds {
        let start = Instant::now();
        let mut refs = Vec::with_capacity(obstacles);
        for i in 0..obstacles {
            // Golden-ratio sequence spreads obstacles evenly over the scene.
            let u = ((i + round * obstacles) as f32 * 0.618_034).fract();
            let v = ((i + round * obstacles) as f32 * 0.754_877_7).fract();
            let pos = bmin + Vec3::new(u * extent.x, 0.0, v * extent.z);
            let r = match i % 3 {
                0 => cache.add_obstacle(pos, radius, 2.0)?,
                1 => cache.add_box_obstacle(pos - Vec3::new(radius, 0.5, radius), pos + Vec3::new(radius, 2.0, radius))?,
                _ => cache.add_oriented_box_obstacle(pos, Vec3::new(radius * 1.5, 1.0, radius * 0.5), u * std::f32::consts::PI)?,
            };
            refs.push(r);
            if cache.pending_request_count() == tilecache::MAX_REQUESTS {
                settle(&mut cache, &mut navmesh)?;
            }
        }
        let add_ticks = settle(&mut cache, &mut navmesh)?;
        let blocked_polys = navmesh.poly_count();

        for r in refs {
            cache.remove_obstacle(r)?;
            if cache.pending_request_count() == tilecache::MAX_REQUESTS {
                settle(&mut cache, &mut navmesh)?;
            }
        }
        let remove_ticks = settle(&mut cache, &mut navmesh)?;

        println!(
            "Round {}: {} obstacles, {} polygons while blocked, settled in {} + {} ticks ({:.1} ms)",
            round + 1,
            obstacles,
            blocked_polys,
            add_ticks,
            remove_ticks,
            start.elapsed().as_secs_f64() * 1000.0
        );
    }

    println!(
        "Final navmesh: {} tiles, {} polygons, {} active obstacles",
        navmesh.tile_count(),
        navmesh.poly_count(),
        cache.active_obstacle_count()
    );
    Ok(())
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let cache = load_cache(path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(cache.params())?);
    } else {
        let p = cache.params();
        println!("Tile set {}", path.display());
        println!("  origin: {:?}", p.origin);
        println!("  cell size: {} x {}", p.cs, p.ch);
        println!("  tile size: {} x {} cells", p.width, p.height);
        println!("  capacity: {} tiles, {} obstacles", p.max_tiles, p.max_obstacles);
    }

    println!("{} tiles:", cache.tile_count());
    for i in 0..cache.tile_capacity() {
        let Some(tile) = cache.get_tile(i) else { continue };
        let Some(h) = tile.header() else { continue };
        println!(
            "  ({:3}, {:3}, {}) {}x{} usable [{}..{}]x[{}..{}] heights {}..{} {} bytes",
            h.tx,
            h.ty,
            h.tlayer,
            h.width,
            h.height,
            h.minx,
            h.maxx,
            h.miny,
            h.maxy,
            h.hmin,
            h.hmax,
            tile.data().len()
        );
    }
    Ok(())
}

use crate::simulator::Simulator;
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

const STATE_FILE: &str = "state.toml";
const RNG_FILE: &str = "rng.msgpack";

/// Simulation engine.
///
/// Holds a simulator together with its own random number stream,
/// and provides methods to run, save, and load simulations.
pub struct Engine {
    sim: Simulator,
    rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` whose stream is seeded from the OS.
    pub fn new(sim: Simulator) -> Result<Self> {
        let rng = ChaCha12Rng::try_from_os_rng()?;
        Ok(Self { sim, rng })
    }

    /// Create a new `Engine` on stream `stream` of a fixed seed.
    ///
    /// Different streams of the same seed never overlap.
    pub fn with_stream(sim: Simulator, seed: u64, stream: u64) -> Self {
        let mut rng = ChaCha12Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        Self { sim, rng }
    }

    pub fn sim(&self) -> &Simulator {
        &self.sim
    }

    /// Run `n_iterations` trials, logging progress every tenth of the way.
    pub fn run(&mut self, n_iterations: u64) -> Result<()> {
        let log_every = (n_iterations / 10).max(1);
        for i_iter in 0..n_iterations {
            self.sim
                .advance(&mut self.rng)
                .context("failed to advance simulator")?;

            if (i_iter + 1) % log_every == 0 {
                let progress = 100.0 * (i_iter + 1) as f64 / n_iterations as f64;
                log::info!("completed {progress:06.2}%");
            }
        }
        Ok(())
    }

    /// Save a checkpoint of the simulator and its random stream into `dir`.
    ///
    /// Each file is written under a temporary name and renamed into place.
    /// The stream goes first, as `state.toml` marks a complete checkpoint.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;

        let bytes = encode::to_vec(&self.rng).context("failed to serialize rng")?;
        write_replacing(&dir.join(RNG_FILE), &bytes)?;

        let text = self.sim.to_text().context("failed to serialize simulator")?;
        write_replacing(&dir.join(STATE_FILE), text.as_bytes())?;

        Ok(())
    }

    /// Load a previously saved checkpoint.
    ///
    /// Without a saved stream the simulator continues on a fresh one.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let sim = load_state(dir)?;

        let file = dir.join(RNG_FILE);
        if !file.exists() {
            log::warn!("no saved stream in {dir:?}, continuing with a fresh one");
            return Self::new(sim);
        }
        let handle = File::open(&file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(handle);
        let rng = decode::from_read(&mut reader).context("failed to deserialize rng")?;

        Ok(Self { sim, rng })
    }
}

fn write_replacing(file: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp_name = file.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_file = PathBuf::from(tmp_name);

    let handle =
        File::create(&tmp_file).with_context(|| format!("failed to create {tmp_file:?}"))?;
    let mut writer = BufWriter::new(handle);
    writer
        .write_all(contents)
        .with_context(|| format!("failed to write {tmp_file:?}"))?;
    writer.flush().context("failed to flush writer stream")?;
    writer
        .get_ref()
        .sync_all()
        .with_context(|| format!("failed to sync {tmp_file:?}"))?;

    fs::rename(&tmp_file, file)
        .with_context(|| format!("failed to move {tmp_file:?} to {file:?}"))?;
    Ok(())
}

/// Whether `dir` holds a saved simulator.
pub fn has_state<P: AsRef<Path>>(dir: P) -> bool {
    dir.as_ref().join(STATE_FILE).is_file()
}

/// Load only the simulator saved in `dir`.
pub fn load_state<P: AsRef<Path>>(dir: P) -> Result<Simulator> {
    let file = dir.as_ref().join(STATE_FILE);
    let text = fs::read_to_string(&file).with_context(|| format!("failed to read {file:?}"))?;
    let sim = Simulator::from_text(&text).with_context(|| format!("failed to parse {file:?}"))?;
    Ok(sim)
}

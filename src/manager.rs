use crate::analysis::Report;
use crate::config::{ExistsPolicy, SimConfig};
use crate::engine::{self, Engine};
use crate::simulator::Simulator;
use anyhow::{Context, Result, bail};
use glob::glob;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

/// One configured simulation, ready to run.
pub struct Job {
    pub name: String,
    pub n_iterations: u64,
    pub if_exists: ExistsPolicy,
    pub stream: u64,
    pub sim: Simulator,
}

pub struct Manager {
    sim_dir: PathBuf,
    cfg: SimConfig,
    jobs: Vec<Job>,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            SimConfig::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        let base = Simulator::new(&cfg.game).context("failed to construct base simulator")?;
        let jobs = cfg
            .jobs
            .iter()
            .enumerate()
            .map(|(i_job, job)| -> Result<Job> {
                let sim = base
                    .with_overrides(&job.overrides)
                    .with_context(|| format!("invalid overrides of job {:?}", job.name))?;
                Ok(Job {
                    name: job.name.clone(),
                    n_iterations: job.n_iterations.unwrap_or(cfg.run.n_iterations),
                    if_exists: job.if_exists.unwrap_or(cfg.run.if_exists),
                    stream: i_job as u64,
                    sim,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { sim_dir, cfg, jobs })
    }

    /// Run every job on a pool of worker threads.
    ///
    /// A failing job does not stop the others.
    pub fn run_jobs(&self, n_threads: Option<usize>) -> Result<()> {
        let n_threads = n_threads
            .or(self.cfg.run.n_threads)
            .unwrap_or_else(default_n_threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build()
            .context("failed to build thread pool")?;
        log::info!("starting {} jobs with {n_threads} threads", self.jobs.len());

        let n_done = AtomicUsize::new(0);
        let n_failed = pool.install(|| {
            self.jobs
                .par_iter()
                .map(|job| {
                    let result = self.run_job(job, &n_done);
                    if let Err(error) = &result {
                        log::error!("job {:?} failed: {error:#}", job.name);
                    }
                    result.is_err()
                })
                .filter(|&failed| failed)
                .count()
        });

        if n_failed > 0 {
            bail!("{n_failed} of {} jobs failed", self.jobs.len());
        }
        Ok(())
    }

    fn run_job(&self, job: &Job, n_done: &AtomicUsize) -> Result<()> {
        let job_dir = self.job_dir(&job.name);

        let mut engine = if engine::has_state(&job_dir) {
            match job.if_exists {
                ExistsPolicy::Skip => {
                    self.report_done("skipped", &job_dir, n_done);
                    return Ok(());
                }
                ExistsPolicy::Restart => {
                    log::info!("restarting {job_dir:?}");
                    self.new_engine(job)?
                }
                ExistsPolicy::Resume => {
                    let engine = Engine::load(&job_dir)
                        .with_context(|| format!("failed to load {job_dir:?}"))?;
                    log::info!(
                        "resuming {job_dir:?} after {} trials",
                        engine.sim().trials_run()
                    );
                    engine
                }
            }
        } else {
            log::info!("starting {job_dir:?}");
            self.new_engine(job)?
        };

        engine
            .run(job.n_iterations)
            .with_context(|| format!("failed to run job {:?}", job.name))?;

        engine
            .save(&job_dir)
            .with_context(|| format!("failed to save {job_dir:?}"))?;

        self.report_done("completed", &job_dir, n_done);
        Ok(())
    }

    fn new_engine(&self, job: &Job) -> Result<Engine> {
        let sim = job.sim.clone();
        match self.cfg.run.seed {
            Some(seed) => Ok(Engine::with_stream(sim, seed, job.stream)),
            None => Engine::new(sim).context("failed to seed engine"),
        }
    }

    fn report_done(&self, action: &str, job_dir: &Path, n_done: &AtomicUsize) {
        let n = n_done.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("{action} {n} of {} ({job_dir:?})", self.jobs.len());
    }

    /// Write a report next to every saved simulator.
    ///
    /// With a configured seed every report is reproducible.
    pub fn analyze(&self, n_trials: usize) -> Result<()> {
        let state_dirs = self.saved_dirs().context("failed to find saved states")?;
        if state_dirs.is_empty() {
            log::warn!("no saved states in {:?}", self.sim_dir);
        }

        for dir in state_dirs {
            let mut rng = match self.cfg.run.seed {
                Some(seed) => ChaCha12Rng::seed_from_u64(seed),
                None => ChaCha12Rng::try_from_os_rng().context("failed to seed analysis")?,
            };
            let sim = engine::load_state(&dir)?;
            let report = Report::new(&sim, n_trials, &mut rng);
            log::info!("{dir:?}: {}", report.summary());

            report
                .save(dir.join("results.json"))
                .context("failed to save results")?;
        }

        Ok(())
    }

    /// Remove the output directories of all configured jobs.
    pub fn clean(&self) -> Result<()> {
        for job in &self.jobs {
            let job_dir = self.job_dir(&job.name);
            if job_dir.exists() {
                fs::remove_dir_all(&job_dir)
                    .with_context(|| format!("failed to remove {job_dir:?}"))?;
                log::info!("removed {job_dir:?}");
            }
        }
        Ok(())
    }

    fn saved_dirs(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.sim_dir.join("*").join("state.toml");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let mut dirs: Vec<_> = glob(pattern)
            .context("failed to glob state files")?
            .filter_map(Result::ok)
            .filter_map(|file| file.parent().map(Path::to_path_buf))
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    fn job_dir(&self, name: &str) -> PathBuf {
        self.sim_dir.join(name)
    }
}

fn default_n_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

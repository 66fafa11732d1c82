//! Simulated-annealing vocabulary selection over the token graph.
//!
//! Worker tasks toggle batches of candidates between the enabled and
//! disabled pools. Each step simulates the utility delta of a toggle,
//! scores it against the Lomax model of the utility distribution, and
//! accepts with the Glauber probability at the current temperature.
//! Individual reads of the shared counters may be stale across concurrent
//! batches; convergence is statistical, not deterministic.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution};
use tracing::{debug, info};

use crate::lock;
use crate::lomax::LomaxDist;
use crate::pool::Scheduler;
use crate::token::TokenGraph;

/// Selection parameters.
#[derive(Debug, Clone, Default)]
pub struct SelectorOptions {
    /// Target vocabulary size P (multi-character tokens kept enabled).
    pub pref_token_count: usize,
    /// Candidates toggled per worker task (`None` = hardware threads).
    pub batch_size: Option<usize>,
    /// Worker threads (`None` = hardware threads). Clamped so that
    /// `batch_size * threads <= tot_cand`.
    pub threads: Option<usize>,
    /// Seed for the per-task random streams (`None` = OS entropy).
    pub seed: Option<u64>,
}

/// Snapshot reported at the end of each pass.
#[derive(Debug, Clone, Copy)]
pub struct PassReport {
    pub pass: usize,
    /// Annealing steps taken so far.
    pub steps: u64,
    pub score: f64,
    /// Currently enabled multi-character candidates.
    pub enabled: usize,
    pub temp: f64,
}

/// One candidate pool. The atomic count mirrors the vector length so batch
/// sizing can read it without the mutex.
struct CandidatePool {
    items: Mutex<Vec<u32>>,
    count: AtomicUsize,
}

impl CandidatePool {
    fn new(items: Vec<u32>) -> Self {
        let count = AtomicUsize::new(items.len());
        Self {
            items: Mutex::new(items),
            count,
        }
    }

    fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Pop up to `want` uniformly random candidates (swap with the back,
    /// then pop) under a single lock acquisition.
    fn pop_random(&self, want: usize, rng: &mut SmallRng, out: &mut Vec<u32>) {
        let mut items = lock(&self.items);
        let take = want.min(items.len());
        for _ in 0..take {
            let pick = rng.random_range(0..items.len());
            let last = items.len() - 1;
            items.swap(pick, last);
            out.push(items.pop().expect("pool is non-empty"));
        }
        self.count.store(items.len(), Ordering::Release);
    }

    fn push_all(&self, incoming: &[u32]) {
        if incoming.is_empty() {
            return;
        }
        let mut items = lock(&self.items);
        items.extend_from_slice(incoming);
        self.count.store(items.len(), Ordering::Release);
    }
}

struct SelectorState {
    tot_cand: usize,
    pref_cand: usize,
    enabled_cnt: AtomicUsize,
    raw_score: AtomicI64,
    gen_cnt: AtomicU64,
    temp_bits: AtomicU64,
    score_dist: LomaxDist,
    enabled: CandidatePool,
    disabled: CandidatePool,
    seed: Option<u64>,
    rng_stream: AtomicU64,
}

impl SelectorState {
    fn task_rng(&self) -> SmallRng {
        match self.seed {
            Some(seed) => {
                let stream = self.rng_stream.fetch_add(1, Ordering::Relaxed);
                SmallRng::seed_from_u64(seed.wrapping_add(stream))
            }
            None => SmallRng::from_rng(&mut rand::rng()),
        }
    }

    /// Aggregate score of a hypothetical `(raw_score, enabled_cnt)` state:
    /// the raw savings normalized by what the best `n/tot` fraction of
    /// candidates should contribute under the Lomax fit, shaped by the
    /// `f(2-f)` occupancy penalty peaking at `n = pref_cand`.
    fn score(&self, raw: f64, enabled: usize) -> f64 {
        if enabled == 0 {
            return 0.0;
        }
        let fill = enabled as f64 / self.pref_cand as f64;
        let contrib =
            self.tot_cand as f64 * self.score_dist.best(enabled as f64 / self.tot_cand as f64);
        raw / contrib * fill * (2.0 - fill)
    }

    fn temp(&self) -> f64 {
        f64::from_bits(self.temp_bits.load(Ordering::Relaxed))
    }
}

/// The annealing selector. Cheap to clone handles into worker tasks; all
/// mutable state lives behind atomics, the pool mutexes, and the token
/// mutex pool.
pub struct Selector {
    graph: Arc<TokenGraph>,
    state: Arc<SelectorState>,
    batch_size: usize,
    threads: usize,
}

impl Selector {
    /// Initialize pools and the utility distribution from the graph.
    ///
    /// All multi-character candidates start disabled; roots are enabled by
    /// the graph itself. The Lomax moments are seeded from
    /// `uses * (len - 1)` over the full candidate set, which provides the
    /// variance `update_params` needs before the first batch.
    pub fn new(graph: TokenGraph, options: &SelectorOptions) -> Self {
        let graph = Arc::new(graph);
        let mut disabled = Vec::new();
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for index in 0..graph.len() as u32 {
            let token = graph.get(index);
            if token.is_root() {
                continue;
            }
            disabled.push(index);
            let x = (token.left_uses() * (graph.token_len(index) as u64 - 1)) as f64;
            sum += x;
            sum_sq += x * x;
        }
        let tot_cand = disabled.len();
        let pref_cand = options.pref_token_count.clamp(1, tot_cand.max(1));

        let score_dist = LomaxDist::new();
        if tot_cand > 0 {
            score_dist.set_moments(sum / tot_cand as f64, sum_sq / tot_cand as f64);
            score_dist.update_params();
            score_dist.set_half_life(tot_cand as f64);
        }

        let hardware = std::thread::available_parallelism().map_or(4, |n| n.get());
        let batch_size = options
            .batch_size
            .unwrap_or(hardware)
            .clamp(1, tot_cand.max(1));
        let threads = options
            .threads
            .unwrap_or(hardware)
            .clamp(1, (tot_cand.max(1) / batch_size).max(1));

        info!(
            candidates = tot_cand,
            target = pref_cand,
            batch_size,
            threads,
            "selector initialized"
        );
        Self {
            graph,
            state: Arc::new(SelectorState {
                tot_cand,
                pref_cand,
                enabled_cnt: AtomicUsize::new(0),
                raw_score: AtomicI64::new(0),
                gen_cnt: AtomicU64::new(0),
                temp_bits: AtomicU64::new(0.003f64.to_bits()),
                score_dist,
                enabled: CandidatePool::new(Vec::new()),
                disabled: CandidatePool::new(disabled),
                seed: options.seed,
                rng_stream: AtomicU64::new(0),
            }),
            batch_size,
            threads,
        }
    }

    /// Worker-thread count the pool should use for `run`.
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn graph(&self) -> &TokenGraph {
        &self.graph
    }

    pub fn enabled_count(&self) -> usize {
        self.state.enabled_cnt.load(Ordering::Acquire)
    }

    pub fn raw_score(&self) -> i64 {
        self.state.raw_score.load(Ordering::Acquire)
    }

    /// Aggregate score of the current state.
    pub fn score(&self) -> f64 {
        self.state.score(
            self.state.raw_score.load(Ordering::Acquire) as f64,
            self.state.enabled_cnt.load(Ordering::Acquire),
        )
    }

    /// Run annealing passes until `pass_count` is exhausted or `report`
    /// returns `false`. One pass dispatches `ceil(tot_cand / batch_size)`
    /// batch tasks and waits for all of them.
    pub fn run(
        &self,
        pool: &dyn Scheduler,
        pass_count: Option<usize>,
        mut report: impl FnMut(PassReport) -> bool,
    ) {
        if self.state.tot_cand == 0 {
            info!("no multi-character candidates, selection is trivial");
            report(PassReport {
                pass: 0,
                steps: 0,
                score: 0.0,
                enabled: 0,
                temp: self.state.temp(),
            });
            return;
        }
        let tasks_per_pass = self.state.tot_cand.div_ceil(self.batch_size);
        let mut pass = 0;
        loop {
            pass += 1;
            let refs: Vec<_> = (0..tasks_per_pass)
                .map(|_| {
                    let state = Arc::clone(&self.state);
                    let graph = Arc::clone(&self.graph);
                    let batch_size = self.batch_size;
                    pool.enqueue(Box::new(move || run_batch(&state, &graph, batch_size)))
                })
                .collect();
            pool.wait(&refs);

            let snapshot = PassReport {
                pass,
                steps: self.state.gen_cnt.load(Ordering::Acquire),
                score: self.score(),
                enabled: self.enabled_count(),
                temp: self.state.temp(),
            };
            debug!(
                pass = snapshot.pass,
                steps = snapshot.steps,
                score = snapshot.score,
                enabled = snapshot.enabled,
                temp = snapshot.temp,
                "pass complete"
            );
            if !report(snapshot) {
                info!(pass, "selection stopped by control signal");
                break;
            }
            if pass_count.is_some_and(|count| pass >= count) {
                break;
            }
        }
    }

    /// Rank the enabled candidates by their final simulated utility
    /// (descending, ties broken by the token string) and append every root
    /// in graph order.
    pub fn solution(&self) -> Vec<String> {
        let mut ranked: Vec<(u64, String)> = Vec::new();
        let mut roots = Vec::new();
        for index in 0..self.graph.len() as u32 {
            let token = self.graph.get(index);
            if token.is_root() {
                roots.push(self.graph.name(index));
            } else if token.is_enabled() {
                ranked.push((self.graph.simulate(index), self.graph.name(index)));
            }
        }
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let mut solution: Vec<String> = ranked.into_iter().map(|(_, name)| name).collect();
        solution.extend(roots);
        solution
    }
}

/// One batch task: sample how many of the `batch_size` toggles are enables,
/// run both sub-batches, feed the observed deltas to the distribution, and
/// return the processed candidates to their pools.
fn run_batch(state: &SelectorState, graph: &TokenGraph, batch_size: usize) {
    let mut rng = state.task_rng();
    let tot = state.tot_cand as u64;
    let pref = state.pref_cand as u64;

    let enabled_now = (state.enabled_cnt.load(Ordering::Relaxed) as u64).min(tot);
    let enable_weight = enabled_now * (tot - pref);
    let disable_weight = (tot - enabled_now) * pref;
    let total_weight = enable_weight + disable_weight;

    let p_enable = if total_weight == 0 {
        0.0
    } else {
        disable_weight as f64 / total_weight as f64
    };
    let sampled = Binomial::new(batch_size as u64, p_enable)
        .map(|binomial| binomial.sample(&mut rng) as usize)
        .unwrap_or(0);
    // Never request more disables than the enabled pool holds, nor more
    // enables than remain disabled.
    let enable_cnt = sampled
        .max(batch_size.saturating_sub(state.enabled.len()))
        .min(state.disabled.len())
        .min(batch_size);

    let corr_enable = total_weight as f64 / (tot * pref) as f64;
    let corr_disable = if tot > pref {
        total_weight as f64 / (tot * (tot - pref)) as f64
    } else {
        0.0
    };

    let steps = state.gen_cnt.fetch_add(batch_size as u64, Ordering::AcqRel);
    let temp = 0.003 * (-(steps as f64) / state.tot_cand as f64 * 0.1).exp();
    state.temp_bits.store(temp.to_bits(), Ordering::Relaxed);

    let mut samples = Vec::with_capacity(batch_size);
    let mut touched = Vec::with_capacity(batch_size);
    run_sub_batch(
        state, graph, true, enable_cnt, corr_enable, temp, &mut rng, &mut samples, &mut touched,
    );
    run_sub_batch(
        state,
        graph,
        false,
        batch_size - enable_cnt,
        corr_disable,
        temp,
        &mut rng,
        &mut samples,
        &mut touched,
    );

    state.score_dist.add_points(&samples);
    state.score_dist.update_params();

    // Push each processed candidate back to whichever pool it now belongs
    // to, one lock acquisition per pool.
    let mut to_enabled = Vec::new();
    let mut to_disabled = Vec::new();
    for index in touched {
        if graph.get(index).is_enabled() {
            to_enabled.push(index);
        } else {
            to_disabled.push(index);
        }
    }
    state.enabled.push_all(&to_enabled);
    state.disabled.push_all(&to_disabled);
}

#[allow(clippy::too_many_arguments)]
fn run_sub_batch(
    state: &SelectorState,
    graph: &TokenGraph,
    enable: bool,
    count: usize,
    corr_factor: f64,
    temp: f64,
    rng: &mut SmallRng,
    samples: &mut Vec<(f64, f64)>,
    touched: &mut Vec<u32>,
) {
    if count == 0 {
        return;
    }
    let source = if enable {
        &state.disabled
    } else {
        &state.enabled
    };
    let start = touched.len();
    source.pop_random(count, rng, touched);

    for position in start..touched.len() {
        let index = touched[position];
        let delta_raw = graph.simulate(index) as f64;

        let raw = state.raw_score.load(Ordering::Relaxed) as f64;
        let enabled_now = state.enabled_cnt.load(Ordering::Relaxed);
        let (new_raw, new_enabled) = if enable {
            (raw + delta_raw, enabled_now + 1)
        } else {
            (raw - delta_raw, enabled_now.saturating_sub(1))
        };
        let delta_score = state.score(new_raw, new_enabled) - state.score(raw, enabled_now);

        let accept = 1.0 / (1.0 + (-delta_score / temp).exp());
        if rng.random::<f64>() < accept {
            let applied = graph.apply(index, enable) as i64;
            if enable {
                state.raw_score.fetch_add(applied, Ordering::AcqRel);
                state.enabled_cnt.fetch_add(1, Ordering::AcqRel);
            } else {
                state.raw_score.fetch_sub(applied, Ordering::AcqRel);
                state.enabled_cnt.fetch_sub(1, Ordering::AcqRel);
            }
        }
        samples.push((delta_raw, corr_factor));
    }
}

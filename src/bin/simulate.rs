use character_roster::config::HostConfig;
use character_roster::error::HookError;
use character_roster::host::CharacterHost;
use character_roster::lifecycle::{CharacterHooks, HookContext};
use character_roster::save_codec::CharacterSaveData;
use character_roster::types::{
    LifecycleState, PlayerId, RawSelector, SelectionContext, SessionId, SlotMask,
};
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const HOST_BLOB: &str = "SAV<svA>DENPOS<svB>SU_C04<svA>";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long)]
    single: bool,
    #[arg(long)]
    sessions: Option<u32>,
    #[arg(long)]
    characters: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct Scenario {
    name: String,
    sessions: u32,
    characters: u32,
    #[serde(rename = "withExclusive")]
    with_exclusive: bool,
    seed: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    seed: u64,
    sessions: u32,
    characters: u32,
    #[serde(rename = "playersBound")]
    players_bound: u32,
    rebinds: u32,
    #[serde(rename = "worldSessions")]
    world_sessions: u32,
    #[serde(rename = "playersAnnounced")]
    players_announced: u32,
    #[serde(rename = "storeRoundTrips")]
    store_round_trips: u32,
    enables: u32,
    disables: u32,
    #[serde(rename = "hookFailures")]
    hook_failures: u32,
    mismatches: u32,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    session: u64,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioRunResult {
    #[serde(flatten)]
    result: ScenarioResultLine,
    #[serde(rename = "anomalyRecords")]
    anomaly_records: Vec<AnomalyRecord>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(rename = "generatedAtIso")]
    generated_at_iso: String,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "averageEnables")]
    average_enables: u32,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Debug, Default)]
struct SimCounters {
    enables: u32,
    disables: u32,
    players_added: u32,
    loaded_enables: Option<u32>,
}

struct CountingHooks {
    counters: Rc<RefCell<SimCounters>>,
    flaky: bool,
}

impl CharacterHooks for CountingHooks {
    fn enable(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.counters.borrow_mut().enables += 1;
        if self.flaky {
            return Err(HookError::msg("flaky character refused to enable"));
        }
        Ok(())
    }

    fn disable(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.counters.borrow_mut().disables += 1;
        Ok(())
    }

    fn player_added(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _session: SessionId,
        _player: PlayerId,
    ) -> Result<(), HookError> {
        self.counters.borrow_mut().players_added += 1;
        Ok(())
    }

    fn save(&mut self, data: &mut CharacterSaveData) -> Result<(), HookError> {
        let counters = self.counters.borrow();
        data.persistent.set("enables", counters.enables);
        data.volatile.set("disables", counters.disables);
        Ok(())
    }

    fn load(&mut self, data: &CharacterSaveData) -> Result<(), HookError> {
        self.counters.borrow_mut().loaded_enables = data.persistent.get("enables");
        Ok(())
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config = match cli.config.as_deref().map(HostConfig::load).transpose() {
        Ok(config) => config.unwrap_or_default().apply_env(),
        Err(error) => {
            error!(%error, "failed to load host config");
            std::process::exit(2);
        }
    };
    let scenarios = resolve_scenarios(&cli);
    let seed_hint = scenarios.first().map(|scenario| scenario.seed).unwrap_or(0);
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(seed_hint, now_ms()));
    let mut has_anomaly = false;
    let mut scenario_results = Vec::new();
    let mut total_anomalies = 0usize;

    for scenario in scenarios {
        info!(
            match_id = %match_id,
            scenario = %scenario.name,
            seed = scenario.seed,
            sessions = scenario.sessions,
            characters = scenario.characters,
            "scenario started"
        );
        let scenario_run = run_scenario(&config, &scenario);

        for anomaly in &scenario_run.anomaly_records {
            warn!(
                match_id = %match_id,
                scenario = %scenario.name,
                session = anomaly.session,
                message = %anomaly.message,
                "anomaly detected"
            );
        }
        if !scenario_run.result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += scenario_run.anomaly_records.len();

        info!(
            match_id = %match_id,
            scenario = %scenario.name,
            enables = scenario_run.result.enables,
            rebinds = scenario_run.result.rebinds,
            anomalies = scenario_run.anomaly_records.len(),
            "scenario finished"
        );
        match serde_json::to_string(&scenario_run.result) {
            Ok(line) => println!("{line}"),
            Err(error) => error!(%error, "failed to serialize scenario result"),
        }
        scenario_results.push(scenario_run.result);
    }

    let summary = build_run_summary(match_id.clone(), scenario_results, total_anomalies);
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            error!(path = %path.display(), %error, "summary write failed");
            std::process::exit(2);
        }
    }

    info!(
        match_id = %match_id,
        scenarios = summary.scenario_count,
        anomalies = summary.anomaly_count,
        "run finished"
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

struct ScenarioState {
    anomalies: Vec<String>,
    anomaly_records: Vec<AnomalyRecord>,
    anomaly_seen: HashSet<String>,
}

impl ScenarioState {
    fn push(&mut self, session: u64, message: String) {
        push_anomaly(
            &mut self.anomalies,
            &mut self.anomaly_records,
            &mut self.anomaly_seen,
            session,
            message,
        );
    }
}

fn run_scenario(config: &HostConfig, scenario: &Scenario) -> ScenarioRunResult {
    let mut state = ScenarioState {
        anomalies: Vec::new(),
        anomaly_records: Vec::new(),
        anomaly_seen: HashSet::new(),
    };
    let mut result = ScenarioResultLine {
        scenario: scenario.name.clone(),
        seed: scenario.seed,
        sessions: scenario.sessions,
        characters: scenario.characters,
        ..ScenarioResultLine::default()
    };

    let mut host = match CharacterHost::new(config.clone()) {
        Ok(host) => host,
        Err(error) => {
            state.push(0, format!("host setup failed: {error}"));
            return finish(result, state);
        }
    };

    let mut counters = Vec::new();
    for idx in 0..scenario.characters {
        let name = format!("Sim {}", idx + 1);
        let exclusive = scenario.with_exclusive && idx % 4 == 3;
        let shared = Rc::new(RefCell::new(SimCounters::default()));
        let hooks = CountingHooks {
            counters: shared.clone(),
            flaky: idx == 1,
        };
        match host.register(&name, !exclusive, "1", Box::new(hooks)) {
            Ok(_) => counters.push((name, shared)),
            Err(error) => state.push(0, format!("registration failed: {error}")),
        }
    }
    host.start_main_loop();

    let mut candidates: Vec<String> = config.builtin_characters.clone();
    candidates.extend(counters.iter().map(|(name, _)| name.clone()));
    let slot_count = config.slot_count.max(1);
    let mut rng = StdRng::seed_from_u64(scenario.seed);

    for round in 0..scenario.sessions {
        let session = SessionId(round as u64 + 1);
        for slot in 0..slot_count {
            let pick = &candidates[rng.random_range(0..candidates.len())];
            host.select(slot, pick);
        }
        let mut active = SlotMask::from_slots((0..slot_count).filter(|_| rng.random_bool(0.7)));
        if active.is_empty() {
            active.insert(0);
        }
        if rng.random_bool(0.5) {
            host.prepare_selection(active);
        }

        let world = host.on_session_start(session, SelectionContext { active_slots: active });
        if let Some(def) = &world {
            result.world_sessions += 1;
            if host.lifecycle_state(&def.name) != LifecycleState::Enabled {
                state.push(session.0, format!("world character {} not enabled", def.name));
            }
        }

        for slot in active.iter() {
            let name = host.selection().get_slot(slot).name.clone();
            let selector = pick_selector(&mut host, &mut rng, &name);
            host.on_player_realized(session, PlayerId(slot as u32), &selector);
            result.players_bound += 1;
        }

        for slot in active.iter() {
            if !rng.random_bool(0.25) {
                continue;
            }
            let name = candidates[rng.random_range(0..candidates.len())].clone();
            let selector = pick_selector(&mut host, &mut rng, &name);
            host.on_player_realized(session, PlayerId(slot as u32), &selector);
            result.rebinds += 1;
        }

        for (player, def) in host.tracker().players(session) {
            if host.lifecycle_state(&def.name) != LifecycleState::Enabled {
                state.push(
                    session.0,
                    format!("{player} bound to {} which is not enabled", def.name),
                );
            }
        }

        let blob = host.save_session(session, HOST_BLOB);
        if !blob.starts_with(HOST_BLOB) {
            state.push(session.0, "save altered host blob".to_string());
        }
        host.load_session(session, &blob);
        if let Some(mut store) = host.file_store() {
            let slot = round % 4;
            let stored = host
                .save_to_store(&mut store, session, slot, HOST_BLOB)
                .and_then(|_| host.load_from_store(&store, session, slot));
            match stored {
                Ok(Some(_)) => result.store_round_trips += 1,
                Ok(None) => state.push(session.0, "stored save went missing".to_string()),
                Err(error) => state.push(session.0, format!("save store failed: {error}")),
            }
        }
        for def in host.session_characters(session) {
            let Some((_, shared)) = counters.iter().find(|(name, _)| *name == def.name) else {
                continue;
            };
            let seen = shared.borrow();
            if seen.loaded_enables != Some(seen.enables) {
                state.push(
                    session.0,
                    format!("save data for {} did not round-trip", def.name),
                );
            }
        }

        host.on_session_end(session);
        for (name, _) in &counters {
            if host.instance_count(name) != 0
                || host.lifecycle_state(name) == LifecycleState::Enabled
            {
                state.push(session.0, format!("{name} still active after session end"));
            }
        }
    }

    for (name, shared) in &counters {
        let Some(controller) = host.lifecycles().get(name) else {
            continue;
        };
        let stats = controller.stats();
        result.enables += stats.enables;
        result.disables += stats.disables;
        result.hook_failures += stats.hook_failures;
        result.mismatches += stats.mismatches;
        result.players_announced += shared.borrow().players_added;
        if stats.enables != stats.disables {
            state.push(
                0,
                format!(
                    "{name} enabled {} times but disabled {}",
                    stats.enables, stats.disables
                ),
            );
        }
        if shared.borrow().enables != stats.enables {
            state.push(0, format!("{name} enable hook count differs from transitions"));
        }
        if stats.mismatches > 0 {
            state.push(0, format!("{name} saw {} unmatched disables", stats.mismatches));
        }
    }

    finish(result, state)
}

fn finish(mut result: ScenarioResultLine, state: ScenarioState) -> ScenarioRunResult {
    result.anomalies = state.anomalies;
    ScenarioRunResult {
        result,
        anomaly_records: state.anomaly_records,
    }
}

fn pick_selector(host: &mut CharacterHost, rng: &mut StdRng, name: &str) -> RawSelector {
    if rng.random_bool(0.5) {
        if let Some(index) = host.index_of(name) {
            return RawSelector::Index(index);
        }
    }
    RawSelector::Name(name.to_string())
}

fn resolve_scenarios(cli: &Cli) -> Vec<Scenario> {
    let seed = cli.seed.unwrap_or_else(now_ms);

    if cli.single || cli.sessions.is_some() || cli.characters.is_some() {
        let characters = cli.characters.unwrap_or(6).clamp(1, 64);
        return vec![Scenario {
            name: format!("custom-c{characters}"),
            sessions: cli.sessions.unwrap_or(20).clamp(1, 10_000),
            characters,
            with_exclusive: true,
            seed,
        }];
    }

    vec![
        Scenario {
            name: "shared-only".to_string(),
            sessions: 25,
            characters: 3,
            with_exclusive: false,
            seed,
        },
        Scenario {
            name: "mixed-exclusive".to_string(),
            sessions: 50,
            characters: 8,
            with_exclusive: true,
            seed: seed.wrapping_add(1),
        },
    ]
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    session: u64,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        session,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_match_id(seed: u64, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    match_id: String,
    scenarios: Vec<ScenarioResultLine>,
    anomaly_count: usize,
) -> RunSummary {
    let scenario_count = scenarios.len();
    let total_enables: u32 = scenarios.iter().map(|scenario| scenario.enables).sum();
    let average_enables = if scenario_count == 0 {
        0
    } else {
        total_enables / scenario_count as u32
    };
    RunSummary {
        match_id,
        generated_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        scenario_count,
        anomaly_count,
        average_enables,
        scenarios,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}

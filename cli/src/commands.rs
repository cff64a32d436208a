//! Command execution
//!
//! Each command returns whether it succeeded in the transactional sense: a
//! transaction that did not commit is reported, then turned into a non-zero
//! exit status by `main`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};

use macspoof_core::filter::{self, InterfaceFilter};
use macspoof_core::history::{HistoryFilter, JsonFileLog, TransactionLog};
use macspoof_core::profile::{Profile, ProfileEntry, ProfileStore};
use macspoof_core::scheduler::{ScheduleAction, ScheduleStore, ScheduledTask, Scheduler};
use macspoof_core::{MacAddressSpoofer, MacStrategy, MacValidator, SpooferConfig, Transaction};

use crate::args::{ActionArg, Cli, Commands, ProfileCommands, ScheduleCommands};
use crate::output::{self, Output};

pub struct Context {
    pub config: SpooferConfig,
    pub out: Output,
    spoofer: Option<Arc<MacAddressSpoofer>>,
}

impl Context {
    /// Config from `--config` or the search path, with CLI overrides applied
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => SpooferConfig::from_file(path)?,
            None => SpooferConfig::load(),
        };
        if let Some(dir) = &cli.state_dir {
            config.storage.state_dir = dir.clone();
        }
        Ok(Self {
            config,
            out: Output::new(cli.json),
            spoofer: None,
        })
    }

    pub fn with_spoofer(config: SpooferConfig, out: Output, spoofer: Arc<MacAddressSpoofer>) -> Self {
        Self {
            config,
            out,
            spoofer: Some(spoofer),
        }
    }

    /// Built on first use so that offline commands work on any host
    fn spoofer(&mut self) -> Result<Arc<MacAddressSpoofer>> {
        if let Some(spoofer) = &self.spoofer {
            return Ok(spoofer.clone());
        }
        let spoofer = Arc::new(
            MacAddressSpoofer::from_config(&self.config).context("Failed to initialise the platform backend")?,
        );
        self.spoofer = Some(spoofer.clone());
        Ok(spoofer)
    }

    fn log(&self) -> Arc<dyn TransactionLog> {
        match &self.spoofer {
            Some(spoofer) => spoofer.log().clone(),
            None => Arc::new(JsonFileLog::new(
                self.config.history_path(),
                self.config.storage.history_limit,
            )),
        }
    }

    fn profiles(&self) -> ProfileStore {
        ProfileStore::new(self.config.profiles_path(), self.config.storage.max_profiles)
    }

    fn schedules(&self) -> ScheduleStore {
        ScheduleStore::new(self.config.schedules_path())
    }

    fn report(&self, tx: &Transaction) -> Result<bool> {
        self.out.emit(tx, || output::transaction(tx))?;
        Ok(tx.succeeded())
    }
}

pub async fn run(command: Commands, ctx: &mut Context) -> Result<bool> {
    match command {
        Commands::List {
            name,
            regex,
            status,
            driver,
            vendor,
            has_ip,
            include_loopback,
            search,
            sort,
            reverse,
            duplicates,
        } => {
            let criteria = InterfaceFilter {
                name,
                regex,
                status,
                driver,
                vendor,
                has_ip: has_ip.then_some(true),
                exclude_loopback: !include_loopback,
            };
            let mut interfaces = ctx.spoofer()?.list_interfaces(&criteria).await?;
            if let Some(keyword) = search {
                interfaces = filter::search(interfaces, &keyword);
            }
            if duplicates {
                let shared = filter::duplicate_macs(&interfaces);
                ctx.out.emit(&shared, || output::duplicates(&shared))?;
                return Ok(true);
            }
            filter::sort_by(&mut interfaces, sort, reverse);
            ctx.out.emit(&interfaces, || output::interfaces(&interfaces))?;
            Ok(true)
        }
        Commands::Show { interface } => {
            let iface = ctx.spoofer()?.interface(&interface).await?;
            ctx.out.emit(&iface, || output::interface_detail(&iface))?;
            Ok(true)
        }
        Commands::Validate { mac } => {
            let validator = MacValidator::new(ctx.config.validation.strict_vendor);
            let mac = validator.validate(&mac)?;
            let report = validator.describe(&mac);
            ctx.out.emit(&report, || output::mac_report(&report))?;
            Ok(true)
        }
        Commands::Generate { random, vendor, count } => {
            let strategy = strategy_for(&ctx.config, random, vendor);
            let validator = MacValidator::new(ctx.config.validation.strict_vendor);
            let reports = (0..count.max(1))
                .map(|_| strategy.generate().map(|mac| validator.describe(&mac)))
                .collect::<Result<Vec<_>, _>>()?;
            ctx.out.emit(&reports, || {
                reports
                    .iter()
                    .map(|r| match &r.vendor {
                        Some(vendor) => format!("{}  {}", r.mac, vendor),
                        None => r.mac.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            Ok(true)
        }
        Commands::Spoof { interface, mac, tx } => {
            let spoofer = ctx.spoofer()?;
            let tx = spoofer.spoof_with(&interface, mac, tx.apply(spoofer.defaults())).await?;
            ctx.report(&tx)
        }
        Commands::Random {
            interface,
            local,
            vendor,
            tx,
        } => {
            let spoofer = ctx.spoofer()?;
            let strategy = strategy_for(&ctx.config, local, vendor);
            let tx = spoofer
                .generate_and_spoof_with(&interface, &strategy, tx.apply(spoofer.defaults()))
                .await?;
            ctx.report(&tx)
        }
        Commands::Batch { mappings, tx } => {
            let spoofer = ctx.spoofer()?;
            let tx = spoofer
                .spoof_batch_with(&mappings, tx.apply(spoofer.defaults()))
                .await?;
            ctx.report(&tx)
        }
        Commands::Restore { interface, original } => {
            let spoofer = ctx.spoofer()?;
            let tx = if original {
                spoofer.restore_original(&interface).await?
            } else {
                spoofer.restore(&interface).await?
            };
            ctx.report(&tx)
        }
        Commands::Recover { transaction_id } => {
            let tx = ctx.spoofer()?.recover(&transaction_id).await?;
            ctx.report(&tx)
        }
        Commands::History {
            interface,
            status,
            limit,
            show,
            export,
            import,
            stats,
            clear,
        } => {
            let log = ctx.log();
            if let Some(path) = export {
                let count = log.export(&path)?;
                ctx.out.emit(&serde_json::json!({ "exported": count }), || {
                    format!("Exported {} transactions to {}.", count, path.display())
                })?;
            } else if let Some(path) = import {
                let added = log.import(&path)?;
                ctx.out.emit(&serde_json::json!({ "imported": added }), || {
                    format!("Imported {} transactions.", added)
                })?;
            } else if let Some(id) = show {
                let Some(tx) = log.get(&id)? else {
                    bail!("No transaction matches '{}'", id);
                };
                ctx.out.emit(&tx, || output::transaction(&tx))?;
            } else if clear {
                let removed = log.clear(interface.as_deref())?;
                ctx.out.emit(&serde_json::json!({ "removed": removed }), || {
                    format!("Removed {} transactions.", removed)
                })?;
            } else if stats {
                let stats = log.stats()?;
                ctx.out.emit(&stats, || output::stats(&stats))?;
            } else {
                let entries = log.list(&HistoryFilter {
                    interface,
                    status,
                    kind: None,
                    limit: Some(limit),
                })?;
                ctx.out.emit(&entries, || output::history(&entries))?;
            }
            Ok(true)
        }
        Commands::Profile(command) => run_profile(command, ctx).await,
        Commands::Schedule(command) => run_schedule(command, ctx).await,
    }
}

async fn run_profile(command: ProfileCommands, ctx: &mut Context) -> Result<bool> {
    let store = ctx.profiles();
    match command {
        ProfileCommands::Save {
            name,
            mappings,
            description,
            tags,
        } => {
            let entries = mappings
                .into_iter()
                .map(|(interface, mac)| ProfileEntry { interface, mac })
                .collect();
            let mut profile = Profile::new(name, entries);
            profile.description = description.unwrap_or_default();
            profile.tags = tags;
            let saved = store.save(profile)?;
            ctx.out.emit(&saved, || format!("Saved profile {}.", saved.name))?;
        }
        ProfileCommands::List { search } => {
            let profiles = match search {
                Some(keyword) => store.search(&keyword)?,
                None => store.list()?,
            };
            ctx.out.emit(&profiles, || output::profiles(&profiles))?;
        }
        ProfileCommands::Show { name } => {
            let profile = require_profile(&store, &name)?;
            ctx.out.emit(&profile, || output::profile_detail(&profile))?;
        }
        ProfileCommands::Delete { name } => {
            if !store.delete(&name)? {
                bail!("No profile named '{}'", name);
            }
            ctx.out.emit(&serde_json::json!({ "deleted": name }), || {
                format!("Deleted profile {}.", name)
            })?;
        }
        ProfileCommands::Apply { name, tx } => {
            let profile = require_profile(&store, &name)?;
            let spoofer = ctx.spoofer()?;
            let tx = spoofer
                .spoof_batch_with(&profile.mappings(), tx.apply(spoofer.defaults()))
                .await?;
            return ctx.report(&tx);
        }
        ProfileCommands::Clone { source, dest } => {
            let copy = store.clone_profile(&source, &dest)?;
            ctx.out.emit(&copy, || format!("Cloned {} to {}.", source, copy.name))?;
        }
        ProfileCommands::Export { name, path } => {
            store.export(&name, &path)?;
            ctx.out.emit(&serde_json::json!({ "exported": name, "path": path }), || {
                format!("Exported profile {} to {}.", name, path.display())
            })?;
        }
        ProfileCommands::Import { path, name } => {
            let imported = store.import(&path, name.as_deref())?;
            ctx.out.emit(&imported, || format!("Imported profile {}.", imported.name))?;
        }
    }
    Ok(true)
}

fn require_profile(store: &ProfileStore, name: &str) -> Result<Profile> {
    store
        .get(name)?
        .with_context(|| format!("No profile named '{}'", name))
}

async fn run_schedule(command: ScheduleCommands, ctx: &mut Context) -> Result<bool> {
    let store = ctx.schedules();
    match command {
        ScheduleCommands::Add {
            name,
            interface,
            action,
            mac,
            every,
            start,
            max_runs,
            description,
        } => {
            let action = match (action, mac) {
                (ActionArg::SpoofRandom, _) => ScheduleAction::SpoofRandom,
                (ActionArg::Spoof, Some(mac)) => ScheduleAction::SpoofSpecific { mac },
                (ActionArg::Spoof, None) => bail!("--action spoof needs --mac"),
                (ActionArg::Restore, _) => ScheduleAction::Restore,
                (ActionArg::RestoreOriginal, _) => ScheduleAction::RestoreOriginal,
            };
            let start = match start {
                Some(text) => DateTime::parse_from_rfc3339(&text)
                    .with_context(|| format!("Invalid --start '{}'", text))?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            let mut task = ScheduledTask::new(name, interface, action, every, start);
            task.max_runs = max_runs;
            task.description = description.unwrap_or_default();
            let task = store.add(task)?;
            ctx.out.emit(&task, || format!("Scheduled {}.", task.name))?;
        }
        ScheduleCommands::List { search } => {
            let tasks = match search {
                Some(keyword) => store.search(&keyword)?,
                None => store.list()?,
            };
            ctx.out.emit(&tasks, || output::tasks(&tasks))?;
        }
        ScheduleCommands::Remove { name } => {
            if !store.remove(&name)? {
                bail!("No task named '{}'", name);
            }
            ctx.out.emit(&serde_json::json!({ "removed": name }), || {
                format!("Removed task {}.", name)
            })?;
        }
        ScheduleCommands::Enable { name } => {
            let task = store.set_enabled(&name, true)?;
            ctx.out.emit(&task, || format!("Enabled {}.", task.name))?;
        }
        ScheduleCommands::Disable { name } => {
            let task = store.set_enabled(&name, false)?;
            ctx.out.emit(&task, || format!("Disabled {}.", task.name))?;
        }
        ScheduleCommands::ClearCompleted => {
            let removed = store.clear_completed()?;
            ctx.out.emit(&serde_json::json!({ "removed": removed }), || {
                format!("Removed {} completed tasks.", removed)
            })?;
        }
        ScheduleCommands::RunDue => {
            let scheduler = Scheduler::new(ctx.spoofer()?, Arc::new(store), ctx.config.default_strategy());
            let runs = scheduler.run_due(Utc::now()).await?;
            ctx.out.emit(&runs, || output::task_runs(&runs))?;
            return Ok(runs.iter().all(|r| r.outcome.status == "committed"));
        }
        ScheduleCommands::Daemon { interval } => {
            let scheduler = Scheduler::new(ctx.spoofer()?, Arc::new(store), ctx.config.default_strategy());
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            };
            scheduler
                .run(Duration::from_secs(interval.max(1)), shutdown)
                .await;
        }
    }
    Ok(true)
}

/// `--random`/`--local` and `--vendor` win over the configured default
fn strategy_for(config: &SpooferConfig, random: bool, vendor: Option<String>) -> MacStrategy {
    match (random, vendor) {
        (_, Some(vendor)) => MacStrategy::Vendor(vendor),
        (true, None) => MacStrategy::Random,
        (false, None) => config.default_strategy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use macspoof_core::platform::StaticPrivilege;
    use macspoof_core::testing::{FakeFailure, FakePlatform};

    fn context(fake: &Arc<FakePlatform>, dir: &tempfile::TempDir) -> Context {
        let mut config = SpooferConfig::default();
        config.storage.state_dir = dir.path().to_string_lossy().into_owned();
        let spoofer = MacAddressSpoofer::builder()
            .handler(fake.clone())
            .privilege(Arc::new(StaticPrivilege(true)))
            .build()
            .unwrap();
        Context::with_spoofer(config, Output::new(true), Arc::new(spoofer))
    }

    fn parse(args: &[&str]) -> Commands {
        use clap::Parser;
        let mut argv = vec!["macspoof"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    #[tokio::test]
    async fn test_spoof_and_restore_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55"));
        let mut ctx = context(&fake, &dir);

        assert!(run(parse(&["spoof", "eth0", "02:00:5e:10:00:00"]), &mut ctx).await.unwrap());
        assert!(run(parse(&["restore", "eth0"]), &mut ctx).await.unwrap());
        assert_eq!(fake.mac_of("eth0").unwrap().to_string(), "00:11:22:33:44:55");
        assert!(run(parse(&["restore", "eth0", "--original"]), &mut ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_batch_exits_non_zero() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(
            FakePlatform::new()
                .with_interface("eth0", "00:11:22:33:44:55")
                .with_interface("eth1", "00:11:22:33:44:66")
                .fail_set("eth1", FakeFailure::Unsupported),
        );
        let mut ctx = context(&fake, &dir);

        let ok = run(
            parse(&["batch", "eth0=02:00:00:00:00:01", "eth1=02:00:00:00:00:02"]),
            &mut ctx,
        )
        .await
        .unwrap();
        assert!(!ok);
        assert_eq!(fake.mac_of("eth0").unwrap().to_string(), "00:11:22:33:44:55");
    }

    #[tokio::test]
    async fn test_profile_round_trip_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(
            FakePlatform::new()
                .with_interface("eth0", "00:11:22:33:44:55")
                .with_interface("wlan0", "3c:97:0e:00:00:01"),
        );
        let mut ctx = context(&fake, &dir);

        run(
            parse(&["profile", "save", "cafe", "eth0=02:00:00:00:00:01", "wlan0=02:00:00:00:00:02"]),
            &mut ctx,
        )
        .await
        .unwrap();
        assert!(run(parse(&["profile", "apply", "cafe"]), &mut ctx).await.unwrap());
        assert_eq!(fake.mac_of("wlan0").unwrap().to_string(), "02:00:00:00:00:02");

        assert!(run(parse(&["profile", "delete", "cafe"]), &mut ctx).await.unwrap());
        assert!(run(parse(&["profile", "apply", "cafe"]), &mut ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_schedule_run_due() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55"));
        let mut ctx = context(&fake, &dir);

        run(
            parse(&["schedule", "add", "pin", "eth0", "--action", "spoof", "--mac", "02:00:00:00:00:09"]),
            &mut ctx,
        )
        .await
        .unwrap();
        assert!(run(parse(&["schedule", "run-due"]), &mut ctx).await.unwrap());
        assert_eq!(fake.mac_of("eth0").unwrap().to_string(), "02:00:00:00:00:09");

        let tasks = ctx.schedules().list().unwrap();
        assert_eq!(tasks[0].run_count, 1);
    }

    #[test]
    fn test_strategy_for() {
        let config = SpooferConfig::default();
        assert_eq!(strategy_for(&config, false, None), MacStrategy::Realistic);
        assert_eq!(strategy_for(&config, true, None), MacStrategy::Random);
        assert_eq!(
            strategy_for(&config, true, Some("intel".into())),
            MacStrategy::Vendor("intel".into())
        );
    }
}

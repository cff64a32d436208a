//! Orchestrator consumed by the CLI, the scheduler and the MCP server
//!
//! Every operation either fails fast, before anything on the OS is touched
//! (`Err`: bad input, missing privilege, validator policy, lock contention,
//! nothing to restore), or returns the finalised [`Transaction`] with
//! per-step outcomes, whether it committed or not.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::SpooferConfig;
use crate::error::{SpoofError, SpoofResult};
use crate::filter::InterfaceFilter;
use crate::generator;
use crate::history::{HistoryFilter, HistoryStats, JsonFileLog, MemoryLog, TransactionLog};
use crate::interface::NetworkInterface;
use crate::locks::InterfaceLocks;
use crate::mac::{MacAddress, MacReport, MacValidator};
use crate::platform::{
    self, CommandRunner, PlatformHandler, PrivilegeProbe, ProcessPrivilege, SystemCommandRunner,
};
use crate::transaction::{
    OperationKind, Transaction, TransactionManager, TransactionStatus, TransactionStep, TxOptions,
};

const MAX_INTERFACE_ID_LEN: usize = 256;

/// Per-call behaviour; defaults come from the `[transaction]` config section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoofOptions {
    /// Read back every write and fail the step on mismatch
    pub verify: bool,
    /// Unwind applied steps when a later step fails
    pub auto_rollback: bool,
    /// Skip the unicast / known-vendor policy (never the privilege check)
    pub force: bool,
}

impl Default for SpoofOptions {
    fn default() -> Self {
        Self {
            verify: true,
            auto_rollback: true,
            force: false,
        }
    }
}

impl From<SpoofOptions> for TxOptions {
    fn from(opts: SpoofOptions) -> Self {
        TxOptions {
            auto_rollback: opts.auto_rollback,
            verify: opts.verify,
        }
    }
}

/// How `generate_and_spoof` picks an address
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "vendor")]
pub enum MacStrategy {
    /// Real vendor OUI, random host part
    #[default]
    Realistic,
    /// Locally administered random address
    Random,
    /// OUI of the named vendor
    Vendor(String),
}

impl MacStrategy {
    pub fn generate(&self) -> SpoofResult<MacAddress> {
        match self {
            MacStrategy::Realistic => Ok(generator::generate_realistic()),
            MacStrategy::Random => Ok(generator::generate_random()),
            MacStrategy::Vendor(vendor) => {
                let ouis = generator::ouis_for_vendor(vendor);
                let mut rng = rand::thread_rng();
                let oui = rand::seq::SliceRandom::choose(ouis.as_slice(), &mut rng)
                    .copied()
                    .ok_or_else(|| SpoofError::InvalidInput(format!("unknown vendor '{}'", vendor)))?;
                Ok(generator::generate_with_oui(oui, &mut rng))
            }
        }
    }
}

pub struct MacAddressSpoofer {
    manager: TransactionManager,
    validator: MacValidator,
    privilege: Arc<dyn PrivilegeProbe>,
    require_privilege: bool,
    defaults: SpoofOptions,
}

impl std::fmt::Debug for MacAddressSpoofer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacAddressSpoofer")
            .field("backend", &self.manager.handler().name())
            .field("require_privilege", &self.require_privilege)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl MacAddressSpoofer {
    pub fn builder() -> SpooferBuilder {
        SpooferBuilder::default()
    }

    /// Wire up the real backend, privilege probe and on-disk history from config
    pub fn from_config(config: &SpooferConfig) -> SpoofResult<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new(Duration::from_secs(
            config.commands.timeout_secs,
        )));
        let log = JsonFileLog::new(config.history_path(), config.storage.history_limit);

        Self::builder()
            .runner(runner)
            .log(Arc::new(log))
            .validator(MacValidator::new(config.validation.strict_vendor))
            .defaults(SpoofOptions {
                verify: config.transaction.verify_changes,
                auto_rollback: config.transaction.auto_rollback,
                force: false,
            })
            .lock_timeout(config.lock_timeout())
            .require_privilege(config.transaction.privilege_check)
            .build()
    }

    pub fn handler(&self) -> &Arc<dyn PlatformHandler> {
        self.manager.handler()
    }

    pub fn log(&self) -> &Arc<dyn TransactionLog> {
        self.manager.log()
    }

    pub fn validator(&self) -> &MacValidator {
        &self.validator
    }

    pub fn defaults(&self) -> SpoofOptions {
        self.defaults
    }

    // ========== Queries ==========

    pub async fn list_interfaces(&self, filter: &InterfaceFilter) -> SpoofResult<Vec<NetworkInterface>> {
        let interfaces = self.manager.handler().list_interfaces().await?;
        filter.apply(interfaces)
    }

    pub async fn interface(&self, interface_id: &str) -> SpoofResult<NetworkInterface> {
        check_interface_id(interface_id)?;
        self.manager.handler().interface(interface_id).await
    }

    pub fn validate(&self, text: &str) -> SpoofResult<MacAddress> {
        self.validator.validate(text)
    }

    pub fn describe(&self, mac: &MacAddress) -> MacReport {
        self.validator.describe(mac)
    }

    pub fn history(&self, filter: &HistoryFilter) -> SpoofResult<Vec<Transaction>> {
        self.log().list(filter)
    }

    pub fn history_stats(&self) -> SpoofResult<HistoryStats> {
        self.log().stats()
    }

    pub fn transaction(&self, id: &str) -> SpoofResult<Option<Transaction>> {
        self.log().get(id)
    }

    // ========== Mutations ==========

    /// Apply `mac` to one interface
    pub async fn spoof(&self, interface_id: &str, mac: MacAddress) -> SpoofResult<Transaction> {
        self.spoof_with(interface_id, mac, self.defaults).await
    }

    #[instrument(skip(self, mac, options), fields(mac = %mac))]
    pub async fn spoof_with(
        &self,
        interface_id: &str,
        mac: MacAddress,
        options: SpoofOptions,
    ) -> SpoofResult<Transaction> {
        check_interface_id(interface_id)?;
        if !options.force {
            self.validator.check(&mac)?;
        }
        self.ensure_privileged().await?;

        self.run_plan(OperationKind::Spoof, &[(interface_id.to_string(), mac)], options)
            .await
    }

    /// Apply every mapping in order as one all-or-nothing transaction. The
    /// first failing step stops the batch.
    pub async fn spoof_batch(&self, mappings: &[(String, MacAddress)]) -> SpoofResult<Transaction> {
        self.spoof_batch_with(mappings, self.defaults).await
    }

    #[instrument(skip(self, mappings, options), fields(count = mappings.len()))]
    pub async fn spoof_batch_with(
        &self,
        mappings: &[(String, MacAddress)],
        options: SpoofOptions,
    ) -> SpoofResult<Transaction> {
        if mappings.is_empty() {
            return Err(SpoofError::InvalidInput("batch has no entries".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for (interface_id, mac) in mappings {
            check_interface_id(interface_id)?;
            if !seen.insert(interface_id.as_str()) {
                return Err(SpoofError::InvalidInput(format!(
                    "interface {} appears more than once in the batch",
                    interface_id
                )));
            }
            if !options.force {
                self.validator.check(mac)?;
            }
        }
        self.ensure_privileged().await?;

        self.run_plan(OperationKind::Batch, mappings, options).await
    }

    /// Generate a vendor-realistic address and apply it
    pub async fn generate_and_spoof(&self, interface_id: &str) -> SpoofResult<Transaction> {
        self.generate_and_spoof_with(interface_id, &MacStrategy::Realistic, self.defaults)
            .await
    }

    pub async fn generate_and_spoof_with(
        &self,
        interface_id: &str,
        strategy: &MacStrategy,
        options: SpoofOptions,
    ) -> SpoofResult<Transaction> {
        check_interface_id(interface_id)?;
        let mac = strategy.generate()?;
        self.validator.check(&mac)?;
        self.ensure_privileged().await?;

        info!(interface = interface_id, mac = %mac, "generated address");
        self.run_plan(OperationKind::Generate, &[(interface_id.to_string(), mac)], options)
            .await
    }

    /// Re-apply the address the interface had before its most recent
    /// committed change, as a new transaction
    pub async fn restore(&self, interface_id: &str) -> SpoofResult<Transaction> {
        self.restore_from(interface_id, OperationKind::Restore, |log, id| {
            log.most_recent_committed(id)
        })
        .await
    }

    /// Re-apply the address the interface had before its first recorded change
    pub async fn restore_original(&self, interface_id: &str) -> SpoofResult<Transaction> {
        self.restore_from(interface_id, OperationKind::RestoreOriginal, |log, id| {
            log.earliest_committed(id)
        })
        .await
    }

    async fn restore_from<F>(
        &self,
        interface_id: &str,
        kind: OperationKind,
        lookup: F,
    ) -> SpoofResult<Transaction>
    where
        F: Fn(&dyn TransactionLog, &str) -> SpoofResult<Option<TransactionStep>>,
    {
        check_interface_id(interface_id)?;
        self.ensure_privileged().await?;

        let options = SpoofOptions {
            force: true,
            ..self.defaults
        };
        let mut tx = self
            .manager
            .begin(kind, &[interface_id], options.into())
            .await?;

        // looked up under the interface lock so an in-flight spoof is already logged
        let target = lookup(self.log().as_ref(), interface_id)?
            .and_then(|step| step.previous_mac)
            .ok_or_else(|| SpoofError::NothingToRestore {
                interface: interface_id.to_string(),
            })?;

        if let Err(e) = self.manager.execute_step(&mut tx, interface_id, target).await {
            warn!(interface = interface_id, error = %e, "restore step failed");
        }
        Ok(self.manager.finish(tx).await)
    }

    /// Undo a transaction that was left `failed` with auto-rollback off.
    /// Restores its applied steps in reverse order, continuing past failures.
    pub async fn recover(&self, transaction_id: &str) -> SpoofResult<Transaction> {
        let target = self
            .log()
            .get(transaction_id)?
            .ok_or_else(|| SpoofError::InvalidInput(format!("unknown transaction {}", transaction_id)))?;

        if target.status != TransactionStatus::Failed {
            return Err(SpoofError::InvalidState(format!(
                "transaction {} is {}; only failed transactions can be recovered",
                target.id, target.status
            )));
        }
        let already = self.log().list(&HistoryFilter {
            kind: Some(OperationKind::Recover),
            status: Some(TransactionStatus::Committed),
            ..Default::default()
        })?;
        if already.iter().any(|tx| tx.recovers.as_deref() == Some(target.id.as_str())) {
            return Err(SpoofError::InvalidState(format!(
                "transaction {} was already recovered",
                target.id
            )));
        }

        let plan: Vec<(String, MacAddress)> = target
            .steps
            .iter()
            .rev()
            .filter(|s| s.needs_unwind())
            .filter_map(|s| s.previous_mac.map(|m| (s.interface_id.clone(), m)))
            .collect();
        if plan.is_empty() {
            return Err(SpoofError::InvalidState(format!(
                "transaction {} has no applied steps to recover",
                target.id
            )));
        }
        self.ensure_privileged().await?;

        let options = TxOptions {
            auto_rollback: false,
            verify: self.defaults.verify,
        };
        let interfaces: Vec<&str> = plan.iter().map(|(i, _)| i.as_str()).collect();
        let mut tx = self.manager.begin(OperationKind::Recover, &interfaces, options).await?;
        tx.set_recovers(target.id.clone());

        for (interface_id, mac) in &plan {
            if let Err(e) = self.manager.execute_step(&mut tx, interface_id, *mac).await {
                warn!(interface = %interface_id, error = %e, "recovery step failed, continuing");
            }
        }
        Ok(self.manager.finish(tx).await)
    }

    // ========== Internals ==========

    async fn ensure_privileged(&self) -> SpoofResult<()> {
        if self.require_privilege && !self.privilege.is_elevated().await {
            return Err(SpoofError::PermissionDenied(
                "changing MAC addresses requires root or administrator privileges".to_string(),
            ));
        }
        Ok(())
    }

    async fn run_plan(
        &self,
        kind: OperationKind,
        plan: &[(String, MacAddress)],
        options: SpoofOptions,
    ) -> SpoofResult<Transaction> {
        let interfaces: Vec<&str> = plan.iter().map(|(i, _)| i.as_str()).collect();
        let mut tx = self.manager.begin(kind, &interfaces, options.into()).await?;

        for (interface_id, mac) in plan {
            if let Err(e) = self.manager.execute_step(&mut tx, interface_id, *mac).await {
                warn!(tx = %tx.id(), interface = %interface_id, error = %e, "step failed, stopping");
                if let Err(e) = self.manager.fail(&mut tx).await {
                    warn!(tx = %tx.id(), error = %e, "failure handling did not complete");
                }
                break;
            }
        }

        Ok(self.manager.finish(tx).await)
    }
}

/// Pattern characters `Get-NetAdapter -Name` would expand
const WILDCARDS: [char; 4] = ['*', '?', '[', ']'];

/// Reject ids that could never name an interface, that a tool would read as
/// an option, or that a backend would expand to several adapters
pub fn check_interface_id(interface_id: &str) -> SpoofResult<()> {
    if interface_id.trim().is_empty() {
        return Err(SpoofError::InvalidInput("interface id is empty".to_string()));
    }
    if interface_id.len() > MAX_INTERFACE_ID_LEN {
        return Err(SpoofError::InvalidInput(format!(
            "interface id longer than {} characters",
            MAX_INTERFACE_ID_LEN
        )));
    }
    if interface_id.starts_with('-')
        || interface_id
            .chars()
            .any(|c| c.is_control() || WILDCARDS.contains(&c))
    {
        return Err(SpoofError::InvalidInput(format!(
            "invalid interface id '{}'",
            interface_id.escape_debug()
        )));
    }
    Ok(())
}

#[derive(Default)]
pub struct SpooferBuilder {
    handler: Option<Arc<dyn PlatformHandler>>,
    runner: Option<Arc<dyn CommandRunner>>,
    log: Option<Arc<dyn TransactionLog>>,
    privilege: Option<Arc<dyn PrivilegeProbe>>,
    validator: Option<MacValidator>,
    defaults: Option<SpoofOptions>,
    lock_timeout: Option<Duration>,
    require_privilege: Option<bool>,
}

impl SpooferBuilder {
    pub fn handler(mut self, handler: Arc<dyn PlatformHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Runner used for the detected backend and the privilege probe
    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn log(mut self, log: Arc<dyn TransactionLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn privilege(mut self, privilege: Arc<dyn PrivilegeProbe>) -> Self {
        self.privilege = Some(privilege);
        self
    }

    pub fn validator(mut self, validator: MacValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn defaults(mut self, defaults: SpoofOptions) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// `None` waits for interface locks forever
    pub fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn require_privilege(mut self, require: bool) -> Self {
        self.require_privilege = Some(require);
        self
    }

    pub fn build(self) -> SpoofResult<MacAddressSpoofer> {
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(SystemCommandRunner::default()));
        let handler = match self.handler {
            Some(handler) => handler,
            None => platform::detect(runner.clone())?,
        };
        let log = self.log.unwrap_or_else(|| Arc::new(MemoryLog::default()));
        let privilege = self
            .privilege
            .unwrap_or_else(|| Arc::new(ProcessPrivilege::new(runner)));

        info!(backend = handler.name(), "spoofer ready");
        Ok(MacAddressSpoofer {
            manager: TransactionManager::new(handler, log, InterfaceLocks::new(self.lock_timeout)),
            validator: self.validator.unwrap_or_default(),
            privilege,
            require_privilege: self.require_privilege.unwrap_or(true),
            defaults: self.defaults.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::StaticPrivilege;
    use crate::testing::FakePlatform;

    fn spoofer(fake: Arc<FakePlatform>, elevated: bool) -> MacAddressSpoofer {
        MacAddressSpoofer::builder()
            .handler(fake)
            .privilege(Arc::new(StaticPrivilege(elevated)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_check_interface_id() {
        assert!(check_interface_id("eth0").is_ok());
        assert!(check_interface_id("Wi-Fi 2").is_ok());
        assert!(check_interface_id("").is_err());
        assert!(check_interface_id("   ").is_err());
        assert!(check_interface_id("-eth0").is_err());
        assert!(check_interface_id("eth0\n").is_err());
        assert!(check_interface_id(&"x".repeat(300)).is_err());
        assert!(check_interface_id("*").is_err());
        assert!(check_interface_id("Ether?et").is_err());
        assert!(check_interface_id("Wi-Fi[12]").is_err());
    }

    #[tokio::test]
    async fn test_permission_checked_before_handler() {
        let fake = Arc::new(FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55"));
        let s = spoofer(fake.clone(), false);
        let err = s
            .spoof("eth0", "02:00:5e:10:00:00".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SpoofError::PermissionDenied(_)));
        assert!(fake.calls().is_empty());
        assert!(s.history(&HistoryFilter::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multicast_rejected_unless_forced() {
        let fake = Arc::new(FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55"));
        let s = spoofer(fake.clone(), true);
        let multicast: MacAddress = "01:00:5e:00:00:01".parse().unwrap();

        assert!(matches!(
            s.spoof("eth0", multicast).await,
            Err(SpoofError::InvalidInput(_))
        ));
        assert!(fake.calls().is_empty());

        let forced = SpoofOptions {
            force: true,
            ..Default::default()
        };
        let tx = s.spoof_with("eth0", multicast, forced).await.unwrap();
        assert!(tx.is_committed());
    }

    #[tokio::test]
    async fn test_batch_rejects_duplicates_and_empty() {
        let fake = Arc::new(FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55"));
        let s = spoofer(fake.clone(), true);
        let mac: MacAddress = "02:00:00:00:00:01".parse().unwrap();

        assert!(matches!(s.spoof_batch(&[]).await, Err(SpoofError::InvalidInput(_))));
        let dup = vec![("eth0".to_string(), mac), ("eth0".to_string(), mac)];
        assert!(matches!(s.spoof_batch(&dup).await, Err(SpoofError::InvalidInput(_))));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_generate_and_spoof_uses_vendor_prefix() {
        let fake = Arc::new(FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55"));
        let s = spoofer(fake.clone(), true);
        let tx = s.generate_and_spoof("eth0").await.unwrap();

        assert!(tx.is_committed());
        assert_eq!(tx.kind, OperationKind::Generate);
        let applied = tx.steps[0].requested_mac;
        assert!(generator::vendor_of(&applied).is_some());
        assert_eq!(fake.mac_of("eth0"), Some(applied));
    }

    #[tokio::test]
    async fn test_vendor_strategy() {
        let mac = MacStrategy::Vendor("vmware".into()).generate().unwrap();
        assert_eq!(generator::vendor_of(&mac), Some("VMware"));
        assert!(MacStrategy::Vendor("acme".into()).generate().is_err());
        assert!(MacStrategy::Random.generate().unwrap().is_locally_administered());
    }

    #[tokio::test]
    async fn test_restore_without_history() {
        let fake = Arc::new(FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55"));
        let s = spoofer(fake.clone(), true);
        assert!(matches!(
            s.restore("eth0").await,
            Err(SpoofError::NothingToRestore { .. })
        ));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_interfaces_applies_filter() {
        let fake = Arc::new(
            FakePlatform::new()
                .with_interface("eth0", "00:11:22:33:44:55")
                .with_interface("wlan0", "3c:97:0e:00:00:01"),
        );
        let s = spoofer(fake, true);
        let filter = InterfaceFilter {
            name: Some("wlan".into()),
            ..Default::default()
        };
        let listed = s.list_interfaces(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "wlan0");
    }
}

//! The production [`LocalPostgres`]: a real server on this machine.
//!
//! Role changes go through the standard binaries (initdb, pg_ctl,
//! pg_basebackup, pg_rewind, pg_controldata); everything else is SQL
//! over a short-lived local connection, opened per command to keep
//! error handling simple.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, warn};

use steward_pgsql::value::SyncStateAndLsn;
use steward_pgsql::{command, value, ConnInfo, PgClient, PgExecutor};
use steward_types::{Lsn, SystemIdentifier};

use crate::error::{KeeperError, KeeperResult};
use crate::postgres::LocalPostgres;

/// How long to wait for a promotion to leave recovery.
const PROMOTE_WAIT: Duration = Duration::from_millis(200);
const PROMOTE_ATTEMPTS: u32 = 50;

/// How long to wait for received WAL to be replayed.
const REPLAY_WAIT: Duration = Duration::from_millis(100);
const REPLAY_ATTEMPTS: u32 = 50;

/// A PostgreSQL instance managed through its standard binaries.
pub struct ProcessPostgres {
    pgdata: PathBuf,
    bin_dir: Option<PathBuf>,
    conninfo: ConnInfo,
}

impl ProcessPostgres {
    /// Creates a handle over the given data directory and local
    /// connection.
    pub fn new(pgdata: PathBuf, bin_dir: Option<PathBuf>, conninfo: ConnInfo) -> Self {
        Self {
            pgdata,
            bin_dir,
            conninfo,
        }
    }

    fn binary(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Runs one external command, capturing its output.
    fn run(&self, name: &str, args: &[&str]) -> KeeperResult<String> {
        let program = self.binary(name);
        debug!(command = %program.display(), ?args, "running");
        let output = Command::new(&program).args(args).output().map_err(|e| {
            KeeperError::Command {
                command: program.display().to_string(),
                message: e.to_string(),
            }
        })?;
        if !output.status.success() {
            return Err(KeeperError::Command {
                command: format!("{} {}", program.display(), args.join(" ")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn connect(&self) -> KeeperResult<PgClient> {
        Ok(PgClient::connect(&self.conninfo)?)
    }

    fn pgdata_str(&self) -> String {
        self.pgdata.display().to_string()
    }

    fn auto_conf_path(&self) -> PathBuf {
        self.pgdata.join("postgresql.auto.conf")
    }

    fn hba_path(&self) -> PathBuf {
        self.pgdata.join("pg_hba.conf")
    }

    fn config_io_error(&self, e: std::io::Error) -> KeeperError {
        KeeperError::DataDirectory {
            path: self.pgdata_str(),
            message: e.to_string(),
        }
    }

    /// Points the cluster at a primary: `standby.signal` plus
    /// `primary_conninfo` and `primary_slot_name`.
    fn write_standby_configuration(&self, primary: &ConnInfo, slot_name: &str) -> KeeperResult<()> {
        let io_err = |e| self.config_io_error(e);

        let mut auto_conf = match fs::read_to_string(self.auto_conf_path()) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_err(e)),
        };
        auto_conf = auto_conf
            .lines()
            .filter(|l| {
                !l.starts_with("primary_conninfo") && !l.starts_with("primary_slot_name")
            })
            .map(|l| format!("{l}\n"))
            .collect();
        auto_conf.push_str(&format!(
            "primary_conninfo = '{}'\nprimary_slot_name = '{}'\n",
            conf_quote(&primary.to_keyword_value()),
            conf_quote(slot_name),
        ));
        fs::write(self.auto_conf_path(), auto_conf).map_err(io_err)?;
        fs::write(self.pgdata.join("standby.signal"), "").map_err(io_err)?;
        Ok(())
    }
}

/// Doubles single quotes for a postgresql.conf string literal.
fn conf_quote(value: &str) -> String {
    value.replace('\'', "''")
}

/// Formats a pg_hba.conf line allowing replication from a host.
fn hba_line(host: &str) -> String {
    let address = match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => format!("{host}/32"),
        Ok(IpAddr::V6(_)) => format!("{host}/128"),
        Err(_) => host.to_string(), // hostname entry
    };
    format!("host replication all {address} trust\nhost all all {address} trust\n")
}

/// Pulls the system identifier out of pg_controldata output.
fn parse_control_data_sysid(output: &str) -> Option<u64> {
    output
        .lines()
        .find(|l| l.starts_with("Database system identifier:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse().ok())
}

impl LocalPostgres for ProcessPostgres {
    fn is_initialized(&mut self) -> KeeperResult<bool> {
        Ok(self.pgdata.join("PG_VERSION").exists())
    }

    fn initialize(&mut self) -> KeeperResult<()> {
        info!(pgdata = %self.pgdata.display(), "initializing a new cluster");
        if let Some(parent) = self.pgdata.parent() {
            fs::create_dir_all(parent).map_err(|e| self.config_io_error(e))?;
        }
        self.run("initdb", &["-D", &self.pgdata_str(), "--auth", "trust"])?;
        Ok(())
    }

    fn is_running(&mut self) -> KeeperResult<bool> {
        let program = self.binary("pg_ctl");
        let output = Command::new(&program)
            .args(["status", "-D", &self.pgdata_str()])
            .output()
            .map_err(|e| KeeperError::Command {
                command: program.display().to_string(),
                message: e.to_string(),
            })?;
        // exit 0: running; exit 3: stopped; 4: no data directory
        match output.status.code() {
            Some(0) => Ok(true),
            Some(3) | Some(4) => Ok(false),
            _ => Err(KeeperError::Command {
                command: format!("{} status", program.display()),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn start(&mut self) -> KeeperResult<()> {
        info!("starting postgres");
        let port_option = format!("-p {}", self.conninfo.port);
        let log_file = self
            .pgdata
            .parent()
            .unwrap_or(Path::new("."))
            .join("postgres.log");
        self.run(
            "pg_ctl",
            &[
                "start",
                "-D",
                &self.pgdata_str(),
                "-w",
                "-o",
                &port_option,
                "-l",
                &log_file.display().to_string(),
            ],
        )?;
        Ok(())
    }

    fn stop(&mut self) -> KeeperResult<()> {
        info!("stopping postgres");
        self.run(
            "pg_ctl",
            &["stop", "-D", &self.pgdata_str(), "-w", "-m", "fast"],
        )?;
        Ok(())
    }

    fn is_in_recovery(&mut self) -> KeeperResult<bool> {
        let mut client = self.connect()?;
        Ok(command::is_in_recovery(&mut client)?)
    }

    fn system_identifier(&mut self) -> KeeperResult<SystemIdentifier> {
        let output = self.run("pg_controldata", &["-D", &self.pgdata_str()])?;
        parse_control_data_sysid(&output)
            .map(SystemIdentifier::new)
            .ok_or_else(|| KeeperError::DataDirectory {
                path: self.pgdata_str(),
                message: "pg_controldata reported no system identifier".into(),
            })
    }

    fn current_wal_lsn(&mut self) -> KeeperResult<Lsn> {
        let mut client = self.connect()?;
        Ok(command::current_wal_lsn(&mut client)?)
    }

    fn last_receive_lsn(&mut self) -> KeeperResult<Lsn> {
        let mut client = self.connect()?;
        Ok(command::last_receive_lsn(&mut client)?)
    }

    fn replication_state_from_primary(
        &mut self,
        primary: &ConnInfo,
        slot_name: &str,
    ) -> KeeperResult<Option<SyncStateAndLsn>> {
        let mut client = PgClient::connect(primary)?;
        Ok(command::sync_state_and_current_lsn(
            &mut client,
            slot_name,
            true,
        )?)
    }

    fn create_replication_slot(&mut self, slot_name: &str) -> KeeperResult<()> {
        let mut client = self.connect()?;
        Ok(command::create_replication_slot(&mut client, slot_name)?)
    }

    fn drop_replication_slot(&mut self, slot_name: &str) -> KeeperResult<()> {
        let mut client = self.connect()?;
        Ok(command::drop_replication_slot(&mut client, slot_name)?)
    }

    fn add_standby_access(&mut self, host: &str) -> KeeperResult<()> {
        let line = hba_line(host);
        let hba = match fs::read_to_string(self.hba_path()) {
            Ok(text) => text,
            Err(e) => return Err(self.config_io_error(e)),
        };
        if !hba.contains(line.lines().next().unwrap_or_default()) {
            info!(host, "allowing replication connections");
            let mut updated = hba;
            updated.push_str(&line);
            fs::write(self.hba_path(), updated).map_err(|e| self.config_io_error(e))?;
        }
        let mut client = self.connect()?;
        Ok(command::reload_conf(&mut client)?)
    }

    fn enable_synchronous_replication(&mut self) -> KeeperResult<()> {
        let mut client = self.connect()?;
        Ok(command::enable_synchronous_replication(&mut client, "*")?)
    }

    fn disable_synchronous_replication(&mut self) -> KeeperResult<()> {
        let mut client = self.connect()?;
        Ok(command::disable_synchronous_replication(&mut client)?)
    }

    fn checkpoint(&mut self) -> KeeperResult<()> {
        let mut client = self.connect()?;
        Ok(command::checkpoint(&mut client)?)
    }

    fn set_read_only(&mut self, read_only: bool) -> KeeperResult<()> {
        let mut client = self.connect()?;
        Ok(command::set_default_transaction_read_only(
            &mut client,
            read_only,
        )?)
    }

    fn init_as_standby(&mut self, primary: &ConnInfo, slot_name: &str) -> KeeperResult<()> {
        info!(primary = %primary, "cloning the primary");
        if self.is_running()? {
            self.stop()?;
        }
        if self.pgdata.exists() {
            fs::remove_dir_all(&self.pgdata).map_err(|e| self.config_io_error(e))?;
        }

        let host = primary.host.clone();
        let port = primary.port.to_string();
        let user = primary.user.clone().unwrap_or_else(|| "postgres".into());
        let slot = format!("--slot={slot_name}");
        self.run(
            "pg_basebackup",
            &[
                "-h", &host, "-p", &port, "-U", &user, "-D", &self.pgdata_str(),
                "--wal-method=stream", &slot, "--checkpoint=fast",
            ],
        )?;

        self.write_standby_configuration(primary, slot_name)?;
        self.start()
    }

    fn follow_primary(&mut self, primary: &ConnInfo, slot_name: &str) -> KeeperResult<()> {
        info!(primary = %primary, "following the primary");
        if self.is_running()? {
            self.stop()?;
        }
        self.write_standby_configuration(primary, slot_name)?;
        self.start()
    }

    fn rewind(&mut self, primary: &ConnInfo) -> KeeperResult<()> {
        info!(primary = %primary, "rewinding onto the primary's timeline");
        if self.is_running()? {
            self.stop()?;
        }
        let source = primary.to_keyword_value();
        self.run(
            "pg_rewind",
            &[
                "--target-pgdata",
                &self.pgdata_str(),
                "--source-server",
                &source,
            ],
        )?;
        Ok(())
    }

    fn disconnect_replication(&mut self) -> KeeperResult<()> {
        let mut client = self.connect()?;
        Ok(command::disconnect_replication(&mut client)?)
    }

    fn replay_available_wal(&mut self) -> KeeperResult<()> {
        let mut client = self.connect()?;
        for _ in 0..REPLAY_ATTEMPTS {
            let rows = client.query(
                "SELECT (pg_last_wal_replay_lsn() >= pg_last_wal_receive_lsn() \
                         OR pg_last_wal_receive_lsn() IS NULL)::text",
                &[],
            )?;
            if value::parse_bool(&rows)? {
                return Ok(());
            }
            std::thread::sleep(REPLAY_WAIT);
        }
        warn!("WAL replay is lagging behind what was received");
        Ok(())
    }

    fn promote(&mut self) -> KeeperResult<()> {
        info!("promoting");
        self.run("pg_ctl", &["promote", "-D", &self.pgdata_str(), "-w"])?;
        for _ in 0..PROMOTE_ATTEMPTS {
            if !self.is_in_recovery()? {
                return Ok(());
            }
            std::thread::sleep(PROMOTE_WAIT);
        }
        Err(KeeperError::Command {
            command: "pg_ctl promote".into(),
            message: "server is still in recovery after promotion".into(),
        })
    }
}

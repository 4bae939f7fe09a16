//! Employee registry and attendance ledger
//!
//! Disk is the source of truth: one registry file plus one history file per
//! employee, all line-oriented. The in-memory index is a cache rebuilt
//! wholesale after every mutating operation; that is deliberate, the expected
//! employee count is small.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::keygen::{generate_key, DEFAULT_KEY_LEN};
use crate::model::{AttendanceEvent, EmployeeSummary, FIELD_SEPARATOR, NO_BADGE};
use crate::session::derive_sessions;

const REGISTRY_FILE: &str = "employees.data";
const HISTORY_DIR: &str = "emp_history";
const DATA_EXTENSION: &str = "data";
const REPORT_EXTENSION: &str = "csv";

#[derive(Debug, Clone)]
struct EmployeeRecord {
    employee_id: String,
    name: String,
    badge_id: u64,
    history: Vec<AttendanceEvent>,
}

/// The employee registry with per-employee scan histories
#[derive(Debug)]
pub struct AttendanceStore {
    data_dir: PathBuf,
    report_dir: PathBuf,
    /// employee id -> record
    employees: HashMap<String, EmployeeRecord>,
    /// non-zero badge -> employee id
    badge_index: HashMap<u64, String>,
}

impl AttendanceStore {
    /// Open the store rooted at `data_dir`, creating the directory layout and
    /// an empty registry on first use. Reports are written under `report_dir`.
    pub fn open(data_dir: impl Into<PathBuf>, report_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self {
            data_dir: data_dir.into(),
            report_dir: report_dir.into(),
            employees: HashMap::new(),
            badge_index: HashMap::new(),
        };

        fs::create_dir_all(store.data_dir.join(HISTORY_DIR))?;
        if !store.registry_path().exists() {
            fs::write(store.registry_path(), "")?;
            info!(path = %store.registry_path().display(), "created empty employee registry");
        }

        store.reload()?;
        info!(employees = store.employees.len(), "attendance store opened");
        Ok(store)
    }

    fn registry_path(&self) -> PathBuf {
        self.data_dir.join(REGISTRY_FILE)
    }

    fn history_path(&self, employee_id: &str) -> PathBuf {
        self.data_dir
            .join(HISTORY_DIR)
            .join(format!("{employee_id}.{DATA_EXTENSION}"))
    }

    /// Rebuild the in-memory cache from disk
    fn reload(&mut self) -> Result<()> {
        self.employees.clear();
        self.badge_index.clear();

        let registry = self.registry_path();
        let registry_name = registry.display().to_string();

        for line in fs::read_to_string(&registry)?.lines() {
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
            if fields.len() != 3 {
                return Err(Error::Corrupt {
                    file: registry_name.clone(),
                    detail: format!("expected 3 fields, got {}", fields.len()),
                });
            }

            let (employee_id, name) = (fields[0].to_string(), fields[1].to_string());
            let badge_id: u64 = fields[2].parse().map_err(|_| Error::Corrupt {
                file: registry_name.clone(),
                detail: format!("badge id is not a number: '{}'", fields[2]),
            })?;

            if self.employees.contains_key(&employee_id) {
                return Err(Error::Corrupt {
                    file: registry_name.clone(),
                    detail: format!("duplicate employee id '{employee_id}'"),
                });
            }
            if badge_id != NO_BADGE && self.badge_index.contains_key(&badge_id) {
                return Err(Error::Corrupt {
                    file: registry_name.clone(),
                    detail: format!("badge {badge_id} assigned twice"),
                });
            }

            let history = self.load_history(&employee_id)?;
            if badge_id != NO_BADGE {
                self.badge_index.insert(badge_id, employee_id.clone());
            }
            self.employees.insert(
                employee_id.clone(),
                EmployeeRecord {
                    employee_id,
                    name,
                    badge_id,
                    history,
                },
            );
        }

        debug!(employees = self.employees.len(), "registry cache rebuilt");
        Ok(())
    }

    fn load_history(&self, employee_id: &str) -> Result<Vec<AttendanceEvent>> {
        let path = self.history_path(employee_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file_name = path.display().to_string();
        fs::read_to_string(&path)?
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| AttendanceEvent::from_line(line, &file_name))
            .collect()
    }

    /// Register an employee. With no `employee_id`, a fresh key is generated
    /// (regenerating on collision); with no `name`, the name defaults to the
    /// employee id. Returns the employee id.
    pub fn add_employee(
        &mut self,
        badge_id: u64,
        name: Option<&str>,
        employee_id: Option<&str>,
    ) -> Result<String> {
        if let Some(name) = name {
            validate_text(name, "name")?;
        }
        if let Some(id) = employee_id {
            validate_text(id, "employee id")?;
        }

        if badge_id != NO_BADGE && self.badge_index.contains_key(&badge_id) {
            return Err(Error::BadgeAlreadyUsed(badge_id));
        }

        let employee_id = match employee_id {
            Some(id) if self.employees.contains_key(id) => {
                return Err(Error::EmployeeAlreadyExists(id.to_string()));
            }
            Some(id) => id.to_string(),
            None => loop {
                let key = generate_key(DEFAULT_KEY_LEN);
                if !self.employees.contains_key(&key) {
                    break key;
                }
            },
        };

        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => employee_id.clone(),
        };

        append_line(
            &self.registry_path(),
            &format!("{employee_id}{FIELD_SEPARATOR}{name}{FIELD_SEPARATOR}{badge_id}"),
        )?;
        self.reload()?;

        info!(employee_id = %employee_id, name = %name, badge_id, "employee registered");
        Ok(employee_id)
    }

    /// Append a scan to the history of whoever holds `badge_id`.
    /// The append is on disk before this returns.
    pub fn add_entry(&mut self, badge_id: u64, terminal_id: &str, at: NaiveDateTime) -> Result<()> {
        validate_text(terminal_id, "terminal id")?;
        let employee_id = self.owner_of(badge_id)?.employee_id.clone();

        let event = AttendanceEvent::at(at, terminal_id);
        append_line(&self.history_path(&employee_id), &event.to_line())?;
        self.reload()?;

        debug!(employee_id = %employee_id, badge_id, "attendance entry appended");
        Ok(())
    }

    /// Remove the employee holding `badge_id`. The history file is deleted
    /// too unless `keep_history` is set.
    pub fn delete_employee(&mut self, badge_id: u64, keep_history: bool) -> Result<()> {
        let employee_id = self.owner_of(badge_id)?.employee_id.clone();

        let registry = self.registry_path();
        let kept: Vec<String> = fs::read_to_string(&registry)?
            .lines()
            .filter(|line| line.split(FIELD_SEPARATOR).next() != Some(employee_id.as_str()))
            .map(str::to_string)
            .collect();
        write_lines(&registry, &kept)?;

        let history = self.history_path(&employee_id);
        if !keep_history && history.exists() {
            fs::remove_file(history)?;
        }

        self.reload()?;
        info!(employee_id = %employee_id, badge_id, "employee removed");
        Ok(())
    }

    /// Change an employee's display name, keeping id, badge and history.
    /// Implemented as delete-then-recreate under the same employee id.
    pub fn rename_employee(&mut self, badge_id: u64, new_name: &str) -> Result<()> {
        validate_text(new_name, "name")?;
        let employee_id = self.owner_of(badge_id)?.employee_id.clone();

        self.delete_employee(badge_id, true)?;
        self.add_employee(badge_id, Some(new_name), Some(&employee_id))?;
        Ok(())
    }

    /// Move an employee to a different badge, keeping id, name and history.
    /// Reassigning to badge 0 detaches the badge.
    pub fn reassign_badge(&mut self, badge_id: u64, new_badge_id: u64) -> Result<()> {
        let record = self.owner_of(badge_id)?;
        let (employee_id, name) = (record.employee_id.clone(), record.name.clone());

        if new_badge_id != NO_BADGE {
            if let Some(owner) = self.badge_index.get(&new_badge_id) {
                if *owner != employee_id {
                    return Err(Error::BadgeAlreadyUsed(new_badge_id));
                }
            }
        }

        self.delete_employee(badge_id, true)?;
        self.add_employee(new_badge_id, Some(&name), Some(&employee_id))?;
        Ok(())
    }

    /// Display name of whoever holds `badge_id`
    pub fn employee_name(&self, badge_id: u64) -> Result<String> {
        Ok(self.owner_of(badge_id)?.name.clone())
    }

    /// All registry rows, sorted by employee id. Histories are included only
    /// when `include_history` is set.
    pub fn summarize(&self, include_history: bool) -> Vec<EmployeeSummary> {
        let mut rows: Vec<EmployeeSummary> = self
            .employees
            .values()
            .map(|record| EmployeeSummary {
                employee_id: record.employee_id.clone(),
                name: record.name.clone(),
                badge_id: record.badge_id,
                history: if include_history {
                    record.history.clone()
                } else {
                    Vec::new()
                },
            })
            .collect();
        rows.sort_by(|a, b| a.employee_id.cmp(&b.employee_id));
        rows
    }

    /// Derive sessions for whoever holds `badge_id` and write the report
    /// file: one `entry;exit;durationSeconds` line per session.
    pub fn generate_report(&self, badge_id: u64) -> Result<PathBuf> {
        let record = self.owner_of(badge_id)?;
        if record.history.is_empty() {
            return Err(Error::NoData(record.employee_id.clone()));
        }

        let sessions = derive_sessions(&record.history)?;
        fs::create_dir_all(&self.report_dir)?;

        let path = self.report_dir.join(format!(
            "{}_{}.{}",
            record.name.replace(' ', "_"),
            Local::now().format("%b-%d-%Y-%H-%M-%S"),
            REPORT_EXTENSION
        ));

        let mut body = String::new();
        for session in &sessions {
            body.push_str(&format!(
                "{1}{0}{2}{0}{3}\n",
                FIELD_SEPARATOR,
                session.entry.format("%d/%m/%Y"),
                session.exit.format("%d/%m/%Y"),
                session.duration_seconds()
            ));
        }
        fs::write(&path, body)?;

        info!(employee_id = %record.employee_id, sessions = sessions.len(),
              path = %path.display(), "report generated");
        Ok(path)
    }

    /// Number of registered employees
    pub fn len(&self) -> usize {
        self.employees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }

    fn owner_of(&self, badge_id: u64) -> Result<&EmployeeRecord> {
        self.badge_index
            .get(&badge_id)
            .and_then(|id| self.employees.get(id))
            .ok_or(Error::NoSuchEmployee(badge_id))
    }
}

fn validate_text(value: &str, what: &str) -> Result<()> {
    if value.contains(FIELD_SEPARATOR) || value.contains('\n') {
        return Err(Error::InvalidInput(format!(
            "{what} must not contain '{FIELD_SEPARATOR}' or line breaks"
        )));
    }
    Ok(())
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    file.sync_all()?;
    Ok(())
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(path, body)?;
    Ok(())
}

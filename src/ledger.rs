use std::collections::HashMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::store;

/// One batch-registration line: `<name> <+number> <day> de cada <unit> (<amount><flag>)`.
const BATCH_LINE_PATTERN: &str = r"^(?P<name>.+?)\s+(?P<number>\+\d+)\s+(?P<day>\d{1,2})\s+de\s+cada\s+\w+\s+\(\s*(?P<amount>[^\s()]+?)\s*(?P<flag>[\x{1F1E6}-\x{1F1FF}]+)\s*\)$";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEntry {
    pub amount_label: String,
    /// Submission date, not the date the client actually paid.
    pub date: NaiveDate,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub proof_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub name: String,
    pub billing_day: u32,
    pub amount_label: String,
    pub country_flag: String,
    pub payments: Vec<PaymentEntry>,
    #[serde(default)]
    pub suspended: bool,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub line: String,
    pub outcome: EngineResult<String>,
}

/// Identifiers are phone-shaped: '+' followed by at least four digits.
pub fn is_phone_shaped(id: &str) -> bool {
    id.len() >= 5 && id.starts_with('+') && id[1..].bytes().all(|b| b.is_ascii_digit())
}

/// Senders arrive as transport identifiers (`5217771303481@...`); the ledger
/// keys on the `+`-prefixed number.
pub fn ledger_key_for_sender(sender: &str) -> String {
    let number = sender.split('@').next().unwrap_or(sender);
    if number.starts_with('+') {
        number.to_string()
    } else {
        format!("+{number}")
    }
}

fn validate_billing_day(day: u32) -> EngineResult<()> {
    if (1..=31).contains(&day) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "día de pago {day} fuera de rango (1-31)"
        )))
    }
}

/// Persistent client/payment record store. Mutations update the in-memory
/// map, then rewrite the whole backing document before returning; the write
/// gate serializes rewrites so the last snapshot contains every earlier
/// mutation.
pub struct ClientLedger {
    records: DashMap<String, ClientRecord>,
    path: PathBuf,
    write_gate: Mutex<()>,
    line_re: Regex,
}

impl ClientLedger {
    pub fn open(path: PathBuf) -> EngineResult<Self> {
        let doc: HashMap<String, ClientRecord> = store::load_document(&path)?;
        let records = DashMap::new();
        for (k, v) in doc {
            records.insert(k, v);
        }
        let line_re = Regex::new(BATCH_LINE_PATTERN)
            .map_err(|e| EngineError::Validation(format!("batch grammar: {e}")))?;
        Ok(Self {
            records,
            path,
            write_gate: Mutex::new(()),
            line_re,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, number: &str) -> Option<ClientRecord> {
        self.records.get(number).map(|r| r.clone())
    }

    pub fn display_name(&self, number: &str) -> Option<String> {
        self.records.get(number).map(|r| r.name.clone())
    }

    /// Snapshot in store iteration order; callers must not assume sorting.
    pub fn list(&self) -> Vec<(String, ClientRecord)> {
        self.records
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    async fn persist(&self) -> EngineResult<()> {
        let _gate = self.write_gate.lock().await;
        let doc: HashMap<String, ClientRecord> = self
            .records
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        store::persist_document(&self.path, &doc).await
    }

    pub async fn register(
        &self,
        number: &str,
        name: &str,
        billing_day: u32,
        amount_label: &str,
        country_flag: &str,
    ) -> EngineResult<()> {
        if !is_phone_shaped(number) {
            return Err(EngineError::Validation(format!(
                "número '{number}' inválido: debe comenzar con '+' y contener solo dígitos"
            )));
        }
        validate_billing_day(billing_day)?;

        let record = ClientRecord {
            name: name.to_string(),
            billing_day,
            amount_label: amount_label.to_string(),
            country_flag: country_flag.to_string(),
            payments: vec![PaymentEntry {
                amount_label: amount_label.to_string(),
                date: chrono::Local::now().date_naive(),
                confirmed: false,
                proof_reference: None,
            }],
            suspended: false,
        };

        match self.records.entry(number.to_string()) {
            Entry::Occupied(_) => {
                return Err(EngineError::Duplicate(format!(
                    "el cliente {number} ya existe"
                )))
            }
            Entry::Vacant(v) => {
                v.insert(record);
            }
        }
        self.persist().await
    }

    /// Parse and commit one registration per line. Valid lines are committed
    /// even when others fail; every line gets its own outcome.
    pub async fn register_batch(&self, raw: &str) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::new();
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let outcome = match self.line_re.captures(line) {
                None => Err(EngineError::Validation(
                    "formato incorrecto: se espera `Nombre +numero dia de cada mes (Monto Bandera)`"
                        .to_string(),
                )),
                Some(caps) => {
                    let name = caps["name"].trim().to_string();
                    let number = caps["number"].to_string();
                    let amount = caps["amount"].trim().to_string();
                    let flag = caps["flag"].trim().to_string();
                    match caps["day"].parse::<u32>() {
                        Err(_) => Err(EngineError::Validation("día de pago inválido".to_string())),
                        Ok(day) => self
                            .register(&number, &name, day, &amount, &flag)
                            .await
                            .map(|_| name),
                    }
                }
            };
            outcomes.push(BatchOutcome {
                line: line.to_string(),
                outcome,
            });
        }
        outcomes
    }

    pub async fn remove(&self, number: &str) -> EngineResult<ClientRecord> {
        let (_, record) = self
            .records
            .remove(number)
            .ok_or_else(|| EngineError::NotFound(format!("cliente {number} no registrado")))?;
        self.persist().await?;
        Ok(record)
    }

    pub async fn append_payment(&self, number: &str, entry: PaymentEntry) -> EngineResult<()> {
        {
            let mut record = self
                .records
                .get_mut(number)
                .ok_or_else(|| EngineError::NotFound(format!("cliente {number} no registrado")))?;
            record.payments.push(entry);
        }
        self.persist().await
    }

    /// Admin approval: confirm the latest pending entry, attaching the proof
    /// reference; when nothing is pending, record a fresh confirmed entry so
    /// repeated approvals stay visible.
    pub async fn confirm_payment(
        &self,
        number: &str,
        date: NaiveDate,
        proof_reference: &str,
    ) -> EngineResult<()> {
        {
            let mut record = self
                .records
                .get_mut(number)
                .ok_or_else(|| EngineError::NotFound(format!("cliente {number} no registrado")))?;
            let amount = record.amount_label.clone();
            match record.payments.iter_mut().rev().find(|p| !p.confirmed) {
                Some(pending) => {
                    pending.confirmed = true;
                    pending.date = date;
                    pending.proof_reference = Some(proof_reference.to_string());
                }
                None => record.payments.push(PaymentEntry {
                    amount_label: amount,
                    date,
                    confirmed: true,
                    proof_reference: Some(proof_reference.to_string()),
                }),
            }
        }
        self.persist().await
    }

    pub async fn set_suspended(&self, number: &str, suspended: bool) -> EngineResult<()> {
        {
            let mut record = self
                .records
                .get_mut(number)
                .ok_or_else(|| EngineError::NotFound(format!("cliente {number} no registrado")))?;
            record.suspended = suspended;
        }
        self.persist().await
    }
}

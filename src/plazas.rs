use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use super::bank::Bank;
use super::error::ReconcileError;
use super::records::{Transaction, normalize_plaza_id};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PlazaInfo {
    #[serde(rename = "plaza")]
    pub plaza_name: String,
    #[serde(rename = "project")]
    pub project_name: String,
}

/// Plaza ID to plaza/project lookup, per bank.
#[derive(Debug, Default)]
pub struct PlazaDirectory {
    banks: BTreeMap<Bank, HashMap<String, PlazaInfo>>,
}

impl PlazaDirectory {
    /// Loads `plazas.toml` from the config directory. The file has one
    /// table per bank keyed by plaza ID, for example:
    ///
    /// ```toml
    /// [IDFC]
    /// "220001" = { plaza = "Raipur", project = "BPPTPL" }
    /// ```
    pub fn load(config_dir: &Path) -> Result<Self, ReconcileError> {
        let path = config_dir.join("plazas.toml");
        let file = fs_err::read_to_string(&path)?;
        let directory = Self::from_toml_str(&file)?;
        info!(
            plazas = directory.len(),
            "Loaded plaza directory from {}",
            path.display()
        );
        Ok(directory)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ReconcileError> {
        let raw: HashMap<String, HashMap<String, PlazaInfo>> = toml::from_str(s)?;
        let mut banks: BTreeMap<Bank, HashMap<String, PlazaInfo>> = BTreeMap::new();
        for (bank_name, plazas) in raw {
            let bank = Bank::from_str(&bank_name)
                .map_err(|_| ReconcileError::UnknownBank(bank_name.clone()))?;
            let table = banks.entry(bank).or_default();
            for (plaza_id, info) in plazas {
                let plaza_id = normalize_plaza_id(&plaza_id);
                if table.contains_key(&plaza_id) {
                    return Err(ReconcileError::DuplicatePlaza { bank, plaza_id });
                }
                table.insert(plaza_id, info);
            }
        }
        Ok(PlazaDirectory { banks })
    }

    pub fn len(&self) -> usize {
        self.banks.values().map(HashMap::len).sum()
    }

    fn banks(&self, bank: Option<Bank>) -> impl Iterator<Item = (&Bank, &HashMap<String, PlazaInfo>)> {
        self.banks
            .iter()
            .filter(move |(candidate, _)| bank.is_none_or(|bank| **candidate == bank))
    }

    /// Looks a plaza up in the given bank, or in every bank (IDFC first)
    /// when no bank is given.
    pub fn resolve(&self, plaza_id: &str, bank: Option<Bank>) -> Option<(Bank, &PlazaInfo)> {
        let plaza_id = normalize_plaza_id(plaza_id);
        self.banks(bank)
            .find_map(|(bank, plazas)| plazas.get(&plaza_id).map(|info| (*bank, info)))
    }

    pub fn projects(&self, bank: Option<Bank>) -> Vec<&str> {
        let projects: BTreeSet<&str> = self
            .banks(bank)
            .flat_map(|(_, plazas)| plazas.values())
            .map(|info| info.project_name.as_str())
            .collect();
        projects.into_iter().collect()
    }

    pub fn plazas_for_project(&self, project: &str, bank: Option<Bank>) -> Vec<&str> {
        let plaza_ids: BTreeSet<&str> = self
            .banks(bank)
            .flat_map(|(_, plazas)| plazas.iter())
            .filter(|(_, info)| info.project_name == project)
            .map(|(plaza_id, _)| plaza_id.as_str())
            .collect();
        plaza_ids.into_iter().collect()
    }
}

/// Attaches bank, plaza name and project name from the directory. Values
/// already carried by a row are kept. Unknown plazas are left without a
/// project so they drop out of the daily summary.
pub fn enrich(transactions: &mut [Transaction], directory: &PlazaDirectory, bank: Option<Bank>) {
    let mut unknown: BTreeSet<String> = BTreeSet::new();

    for transaction in transactions.iter_mut() {
        match directory.resolve(&transaction.plaza_id, bank) {
            Some((plaza_bank, info)) => {
                transaction.bank.get_or_insert_with(|| plaza_bank.to_string());
                transaction
                    .plaza_name
                    .get_or_insert_with(|| info.plaza_name.clone());
                transaction
                    .project_name
                    .get_or_insert_with(|| info.project_name.clone());
            }
            None => {
                if let Some(bank) = bank {
                    transaction.bank.get_or_insert_with(|| bank.to_string());
                }
                if transaction.project_name.is_none() {
                    unknown.insert(transaction.plaza_id.clone());
                }
            }
        }
    }

    if !unknown.is_empty() {
        warn!(
            count = unknown.len(),
            plaza_ids = ?unknown,
            "Plaza IDs missing from the plaza directory"
        );
    }
}

/// Keeps only reads at the plazas the directory lists for `project`.
pub fn retain_project(
    transactions: &mut Vec<Transaction>,
    directory: &PlazaDirectory,
    project: &str,
    bank: Option<Bank>,
) {
    let plaza_ids: BTreeSet<&str> = directory
        .plazas_for_project(project, bank)
        .into_iter()
        .collect();
    if plaza_ids.is_empty() {
        warn!(
            known_projects = ?directory.projects(bank),
            "No plazas configured for project {}",
            project
        );
    }
    let before = transactions.len();
    transactions.retain(|transaction| plaza_ids.contains(transaction.plaza_id.as_str()));
    info!(
        kept = transactions.len(),
        dropped = before - transactions.len(),
        "Filtered to project {}",
        project
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAZAS: &str = r#"
[IDFC]
"220001" = { plaza = "Raipur", project = "BPPTPL" }
"220002" = { plaza = "Indranagar", project = "BPPTPL" }
"142001" = { plaza = "Ghoti", project = "GHOTI" }

[ICICI]
"142001" = { plaza = "Ghoti East", project = "GHOTI-E" }
"123" = { plaza = "Test Plaza", project = "TEST" }
"#;

    fn directory() -> PlazaDirectory {
        PlazaDirectory::from_toml_str(PLAZAS).unwrap()
    }

    #[test]
    fn test_resolve_with_and_without_bank() {
        let directory = directory();
        assert_eq!(directory.len(), 5);

        let (bank, info) = directory.resolve("142001", None).unwrap();
        assert_eq!(bank, Bank::Idfc);
        assert_eq!(info.plaza_name, "Ghoti");

        let (bank, info) = directory.resolve("142001", Some(Bank::Icici)).unwrap();
        assert_eq!(bank, Bank::Icici);
        assert_eq!(info.project_name, "GHOTI-E");

        assert!(directory.resolve("220001", Some(Bank::Icici)).is_none());
        // IDs in the config are normalised like transaction IDs
        assert_eq!(directory.resolve("000123", None).unwrap().1.project_name, "TEST");
        assert_eq!(directory.resolve(" 123", None).unwrap().1.project_name, "TEST");
    }

    #[test]
    fn test_project_listings() {
        let directory = directory();
        assert_eq!(directory.projects(Some(Bank::Idfc)), vec!["BPPTPL", "GHOTI"]);
        assert_eq!(
            directory.projects(None),
            vec!["BPPTPL", "GHOTI", "GHOTI-E", "TEST"]
        );
        assert_eq!(
            directory.plazas_for_project("BPPTPL", None),
            vec!["220001", "220002"]
        );
        assert!(directory.plazas_for_project("BPPTPL", Some(Bank::Icici)).is_empty());
    }

    #[test]
    fn test_unknown_bank_fails_the_load() {
        let result = PlazaDirectory::from_toml_str("[HDFC]\n\"1\" = { plaza = \"A\", project = \"B\" }\n");
        assert!(matches!(result, Err(ReconcileError::UnknownBank(name)) if name == "HDFC"));
    }

    #[test]
    fn test_ids_that_normalise_alike_fail_the_load() {
        let result = PlazaDirectory::from_toml_str(
            "[IDFC]\n\"123\" = { plaza = \"A\", project = \"B\" }\n\"000123\" = { plaza = \"C\", project = \"D\" }\n",
        );
        match result {
            Err(ReconcileError::DuplicatePlaza { bank, plaza_id }) => {
                assert_eq!(bank, Bank::Idfc);
                assert_eq!(plaza_id, "000123");
            }
            other => panic!("expected a duplicate plaza error, got {:?}", other),
        }
    }

    #[test]
    fn test_enrich_fills_only_missing_values() {
        let directory = directory();
        let mut transactions = vec![
            Transaction::new("220001", "A", None),
            Transaction {
                project_name: Some("OVERRIDE".to_string()),
                ..Transaction::new("220002", "B", None)
            },
            Transaction::new("999999", "C", None),
        ];
        enrich(&mut transactions, &directory, Some(Bank::Idfc));

        assert_eq!(transactions[0].bank.as_deref(), Some("IDFC"));
        assert_eq!(transactions[0].plaza_name.as_deref(), Some("Raipur"));
        assert_eq!(transactions[0].project_name.as_deref(), Some("BPPTPL"));

        assert_eq!(transactions[1].plaza_name.as_deref(), Some("Indranagar"));
        assert_eq!(transactions[1].project_name.as_deref(), Some("OVERRIDE"));

        assert_eq!(transactions[2].bank.as_deref(), Some("IDFC"));
        assert_eq!(transactions[2].plaza_name, None);
        assert_eq!(transactions[2].project_name, None);
    }

    #[test]
    fn test_retain_project() {
        let directory = directory();
        let mut transactions = vec![
            Transaction::new("220001", "A", None),
            Transaction::new("142001", "B", None),
            Transaction::new("220002", "C", None),
        ];
        retain_project(&mut transactions, &directory, "BPPTPL", None);
        let vehicles: Vec<&str> = transactions.iter().map(|t| t.vehicle_reg_no.as_str()).collect();
        assert_eq!(vehicles, vec!["A", "C"]);

        retain_project(&mut transactions, &directory, "NOPE", None);
        assert!(transactions.is_empty());
    }
}

//! Promotion of staging records into the production store.
//!
//! Every staging person is resolved against production persons with the
//! same [`IdentityIndex`] policy used by ingestion. Matches only fill null
//! fields; nothing already in production is overwritten. Running the
//! migration twice over unchanged staging data writes nothing the second time.

use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::{AppError, StoreError};
use crate::identity::{IdentityIndex, PersonPlan};
use crate::models::{Lead, Person, ProductionLead, Student};
use crate::staging::Write;

/// Read side of the staging store, as seen by the migrator.
#[allow(async_fn_in_trait)]
pub trait StagingSource {
    /// Students joined with their persons, oldest first.
    async fn staged_students(&mut self) -> Result<Vec<(Person, Student)>, StoreError>;
    /// Leads, oldest first.
    async fn staged_leads(&mut self) -> Result<Vec<Lead>, StoreError>;
}

/// Production persistence seam.
#[allow(async_fn_in_trait)]
pub trait ProductionStore {
    async fn load_persons(&mut self) -> Result<Vec<Person>, StoreError>;
    async fn load_students(&mut self) -> Result<Vec<Student>, StoreError>;
    async fn load_leads(&mut self) -> Result<Vec<ProductionLead>, StoreError>;
    /// Writes a person and its student in one transaction.
    async fn write_student(&mut self, person: &Write<Person>, student: &Write<Student>) -> Result<(), StoreError>;
    /// Writes a person and its lead in one transaction.
    async fn write_lead(&mut self, person: &Write<Person>, lead: &Write<ProductionLead>) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub persons_created: usize,
    pub persons_updated: usize,
    pub persons_unchanged: usize,
    pub students_created: usize,
    pub students_updated: usize,
    pub students_unchanged: usize,
    pub leads_created: usize,
    pub leads_updated: usize,
    pub leads_unchanged: usize,
    pub failures: usize,
}

impl MigrationReport {
    pub fn creates(&self) -> usize {
        self.persons_created + self.students_created + self.leads_created
    }

    pub fn updates(&self) -> usize {
        self.persons_updated + self.students_updated + self.leads_updated
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    fn count_person(&mut self, plan: &PersonPlan) {
        match plan {
            PersonPlan::Create(_) => self.persons_created += 1,
            PersonPlan::Update { .. } => self.persons_updated += 1,
            PersonPlan::Unchanged { .. } => self.persons_unchanged += 1,
        }
    }
}

/// Production leads are unique per person, program and source file.
type LeadKey = (Uuid, Option<String>, String);

fn lead_key(lead: &ProductionLead) -> LeadKey {
    (lead.person_id, lead.program_type.clone(), lead.source_file.clone())
}

fn merged<T: Clone>(existing: Option<&T>, candidate: T, merge: impl FnOnce(&mut T, &T) -> bool) -> Write<T> {
    match existing {
        Some(current) => {
            let mut next = current.clone();
            if merge(&mut next, &candidate) {
                Write::Update(next)
            } else {
                Write::Keep
            }
        }
        None => Write::Insert(candidate),
    }
}

struct Migrator<'a, P: ProductionStore> {
    target: &'a mut P,
    dry_run: bool,
    persons: IdentityIndex,
    students_by_person: HashMap<Uuid, Student>,
    leads_by_key: HashMap<LeadKey, ProductionLead>,
    lead_keys_by_id: HashMap<Uuid, LeadKey>,
    report: MigrationReport,
}

impl<'a, P: ProductionStore> Migrator<'a, P> {
    async fn load(target: &'a mut P, dry_run: bool) -> Result<Self, AppError> {
        let persons = IdentityIndex::from_persons(target.load_persons().await?);
        let students_by_person = target
            .load_students()
            .await?
            .into_iter()
            .map(|s| (s.person_id, s))
            .collect();

        let mut leads_by_key = HashMap::new();
        let mut lead_keys_by_id = HashMap::new();
        for lead in target.load_leads().await? {
            let key = lead_key(&lead);
            lead_keys_by_id.insert(lead.id, key.clone());
            leads_by_key.entry(key).or_insert(lead);
        }
        tracing::info!(
            "Production holds {} persons, {} leads",
            persons.len(),
            leads_by_key.len()
        );

        Ok(Self {
            target,
            dry_run,
            persons,
            students_by_person,
            leads_by_key,
            lead_keys_by_id,
            report: MigrationReport {
                dry_run,
                ..Default::default()
            },
        })
    }

    /// Non-fatal write errors are counted and logged; fatal ones end the migration.
    fn fail(&mut self, err: StoreError, what: &str, id: Uuid) -> Result<(), AppError> {
        if err.is_fatal() {
            return Err(AppError::StoreError(err));
        }
        tracing::warn!("Skipping {} {} ({}): {}", what, id, err.kind(), err);
        self.report.failures += 1;
        Ok(())
    }

    async fn migrate_student(&mut self, person: &Person, student: &Student) -> Result<(), AppError> {
        let plan = self.persons.plan(person);
        let person_id = plan.person_id();

        let mut candidate = student.clone();
        candidate.person_id = person_id;
        let student_write = merged(self.students_by_person.get(&person_id), candidate, Student::merge_missing);
        let person_write = Write::from(&plan);

        if !self.dry_run && !(person_write.is_keep() && student_write.is_keep()) {
            if let Err(e) = self.target.write_student(&person_write, &student_write).await {
                return self.fail(e, "student", student.id);
            }
        }

        self.report.count_person(&plan);
        self.persons.commit(&plan);
        match student_write {
            Write::Insert(s) => {
                self.report.students_created += 1;
                self.students_by_person.insert(person_id, s);
            }
            Write::Update(s) => {
                self.report.students_updated += 1;
                self.students_by_person.insert(person_id, s);
            }
            Write::Keep => self.report.students_unchanged += 1,
        }
        Ok(())
    }

    async fn migrate_lead(&mut self, lead: &Lead) -> Result<(), AppError> {
        let plan = self.persons.plan(&lead.to_person());
        let person_id = plan.person_id();

        let candidate = ProductionLead {
            id: lead.id,
            person_id,
            student_id: self.students_by_person.get(&person_id).map(|s| s.id),
            program_type: lead.program_type.clone(),
            interest_level: lead.interest_level.clone(),
            status: lead.status,
            source_file: lead.source_file.clone(),
            source_sheet: lead.source_sheet.clone(),
            created_at: lead.created_at,
            updated_at: None,
        };
        let key = self
            .lead_keys_by_id
            .get(&lead.id)
            .cloned()
            .unwrap_or_else(|| lead_key(&candidate));
        let lead_write = merged(self.leads_by_key.get(&key), candidate, ProductionLead::merge_missing);
        let person_write = Write::from(&plan);

        if !self.dry_run && !(person_write.is_keep() && lead_write.is_keep()) {
            if let Err(e) = self.target.write_lead(&person_write, &lead_write).await {
                return self.fail(e, "lead", lead.id);
            }
        }

        self.report.count_person(&plan);
        self.persons.commit(&plan);
        match lead_write {
            Write::Insert(l) => {
                self.report.leads_created += 1;
                self.lead_keys_by_id.insert(l.id, key.clone());
                self.leads_by_key.insert(key, l);
            }
            Write::Update(l) => {
                self.report.leads_updated += 1;
                self.leads_by_key.insert(key, l);
            }
            Write::Keep => self.report.leads_unchanged += 1,
        }
        Ok(())
    }
}

/// Migrates every staged student and lead into production.
///
/// With `dry_run` the full decision process runs, and the report shows what
/// would be written, but the target is never written to.
pub async fn run_migration<S, P>(source: &mut S, target: &mut P, dry_run: bool) -> Result<MigrationReport, AppError>
where
    S: StagingSource,
    P: ProductionStore,
{
    tracing::info!("Step 1: Loading staging records");
    let students = source.staged_students().await?;
    let leads = source.staged_leads().await?;
    tracing::info!("Found {} staged students, {} staged leads", students.len(), leads.len());

    tracing::info!("Step 2: Loading production records");
    let mut migrator = Migrator::load(target, dry_run).await?;

    tracing::info!("Step 3: Migrating students");
    for (person, student) in &students {
        migrator.migrate_student(person, student).await?;
    }

    // Leads go last so they can link to students migrated above.
    tracing::info!("Step 4: Migrating leads");
    for lead in &leads {
        migrator.migrate_lead(lead).await?;
    }

    let report = migrator.report;
    tracing::info!(
        "Migration {}: {} created, {} updated, {} failures",
        if dry_run { "dry run finished" } else { "finished" },
        report.creates(),
        report.updates(),
        report.failures
    );
    Ok(report)
}

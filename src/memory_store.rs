//! In-memory stores with the same uniqueness rules as the Postgres schema.
//!
//! Used for ingest dry runs and throughout the tests.

use uuid::Uuid;

use crate::errors::StoreError;
use crate::migrator::{ProductionStore, StagingSource};
use crate::models::{
    Document, FailureRecord, IngestionRun, Lead, Person, ProductionLead, ReferenceRecord, Student,
};
use crate::staging::{StagingStore, UpsertOutcome, Write};

fn check_person(persons: &[Person], person: &Person) -> Result<(), StoreError> {
    if person.full_name.trim().is_empty() {
        return Err(StoreError::Validation("full_name must not be empty".into()));
    }
    if let Some(national_id) = &person.national_id {
        if persons
            .iter()
            .any(|p| p.id != person.id && p.national_id.as_ref() == Some(national_id))
        {
            return Err(StoreError::Duplicate(format!(
                "national_id {} already exists",
                national_id
            )));
        }
    }
    Ok(())
}

fn apply_person(persons: &mut Vec<Person>, write: &Write<Person>) -> Result<(), StoreError> {
    match write {
        Write::Insert(person) => {
            if persons.iter().any(|p| p.id == person.id) {
                return Err(StoreError::Duplicate(format!("person {} already exists", person.id)));
            }
            check_person(persons, person)?;
            persons.push(person.clone());
        }
        Write::Update(person) => {
            check_person(persons, person)?;
            let slot = persons
                .iter_mut()
                .find(|p| p.id == person.id)
                .ok_or_else(|| StoreError::Other(format!("person {} not found", person.id)))?;
            *slot = person.clone();
        }
        Write::Keep => {}
    }
    Ok(())
}

fn apply_student(persons: &[Person], students: &mut Vec<Student>, write: &Write<Student>) -> Result<(), StoreError> {
    match write {
        Write::Insert(student) => {
            if !persons.iter().any(|p| p.id == student.person_id) {
                return Err(StoreError::Validation(format!(
                    "person {} does not exist",
                    student.person_id
                )));
            }
            if students
                .iter()
                .any(|s| s.id == student.id || s.person_id == student.person_id)
            {
                return Err(StoreError::Duplicate(format!(
                    "student for person {} already exists",
                    student.person_id
                )));
            }
            students.push(student.clone());
        }
        Write::Update(student) => {
            let slot = students
                .iter_mut()
                .find(|s| s.id == student.id)
                .ok_or_else(|| StoreError::Other(format!("student {} not found", student.id)))?;
            *slot = student.clone();
        }
        Write::Keep => {}
    }
    Ok(())
}

/// Staging store backed by vectors, in insertion order.
#[derive(Debug, Default, Clone)]
pub struct MemoryStagingStore {
    pub persons: Vec<Person>,
    pub students: Vec<Student>,
    pub documents: Vec<Document>,
    pub leads: Vec<Lead>,
    pub references: Vec<ReferenceRecord>,
    pub runs: Vec<IngestionRun>,
    pub failures: Vec<FailureRecord>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the stored lead the candidate collides with, per the partial unique indexes.
    fn conflicting_lead(&self, lead: &Lead) -> Option<usize> {
        self.leads.iter().position(|existing| match (&lead.email, &lead.phone) {
            (Some(email), _) => existing.email.as_ref() == Some(email),
            (None, Some(phone)) => {
                existing.email.is_none()
                    && existing.normalized_name == lead.normalized_name
                    && existing.phone.as_ref() == Some(phone)
            }
            (None, None) => {
                existing.email.is_none()
                    && existing.phone.is_none()
                    && existing.normalized_name == lead.normalized_name
                    && existing.source_file == lead.source_file
                    && existing.source_sheet == lead.source_sheet
            }
        })
    }
}

impl StagingStore for MemoryStagingStore {
    async fn load_persons(&mut self) -> Result<Vec<Person>, StoreError> {
        Ok(self.persons.clone())
    }

    async fn load_students(&mut self) -> Result<Vec<Student>, StoreError> {
        Ok(self.students.clone())
    }

    async fn write_student(&mut self, person: &Write<Person>, student: &Write<Student>) -> Result<(), StoreError> {
        let mut persons = self.persons.clone();
        let mut students = self.students.clone();
        apply_person(&mut persons, person)?;
        apply_student(&persons, &mut students, student)?;
        self.persons = persons;
        self.students = students;
        Ok(())
    }

    async fn document_exists(&mut self, student_id: Uuid, checksum: &str) -> Result<bool, StoreError> {
        Ok(self
            .documents
            .iter()
            .any(|d| d.student_id == student_id && d.checksum == checksum))
    }

    async fn document_names(&mut self, student_id: Uuid) -> Result<Vec<String>, StoreError> {
        Ok(self
            .documents
            .iter()
            .filter(|d| d.student_id == student_id)
            .map(|d| d.file_name.clone())
            .collect())
    }

    async fn insert_document(&mut self, document: &Document) -> Result<(), StoreError> {
        if !self.students.iter().any(|s| s.id == document.student_id) {
            return Err(StoreError::Validation(format!(
                "student {} does not exist",
                document.student_id
            )));
        }
        if self.document_exists(document.student_id, &document.checksum).await? {
            return Err(StoreError::Duplicate(format!(
                "document {} already registered for student {}",
                document.checksum, document.student_id
            )));
        }
        if self
            .documents
            .iter()
            .any(|d| d.student_id == document.student_id && d.file_name == document.file_name)
        {
            return Err(StoreError::Duplicate(format!(
                "file name {} already used by student {}",
                document.file_name, document.student_id
            )));
        }
        self.documents.push(document.clone());
        Ok(())
    }

    async fn upsert_lead(&mut self, lead: &Lead) -> Result<UpsertOutcome, StoreError> {
        if lead.full_name.trim().is_empty() {
            return Err(StoreError::Validation("full_name must not be empty".into()));
        }
        match self.conflicting_lead(lead) {
            Some(slot) => {
                let existing = &mut self.leads[slot];
                if existing.status == lead.status && existing.notes == lead.notes {
                    return Ok(UpsertOutcome::Unchanged);
                }
                existing.status = lead.status;
                existing.notes = lead.notes.clone();
                existing.updated_at = Some(chrono::Utc::now());
                Ok(UpsertOutcome::Updated)
            }
            None => {
                self.leads.push(lead.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn insert_reference(&mut self, record: &ReferenceRecord) -> Result<(), StoreError> {
        self.references.push(record.clone());
        Ok(())
    }

    async fn record_failure(&mut self, failure: &FailureRecord) -> Result<(), StoreError> {
        self.failures.push(failure.clone());
        Ok(())
    }

    async fn begin_run(&mut self, run: &IngestionRun) -> Result<(), StoreError> {
        self.runs.push(run.clone());
        Ok(())
    }

    async fn finish_run(&mut self, run: &IngestionRun) -> Result<(), StoreError> {
        match self.runs.iter_mut().find(|r| r.id == run.id) {
            Some(slot) => *slot = run.clone(),
            None => self.runs.push(run.clone()),
        }
        Ok(())
    }
}

impl StagingSource for MemoryStagingStore {
    async fn staged_students(&mut self) -> Result<Vec<(Person, Student)>, StoreError> {
        Ok(self
            .students
            .iter()
            .filter_map(|student| {
                self.persons
                    .iter()
                    .find(|p| p.id == student.person_id)
                    .map(|person| (person.clone(), student.clone()))
            })
            .collect())
    }

    async fn staged_leads(&mut self) -> Result<Vec<Lead>, StoreError> {
        Ok(self.leads.clone())
    }
}

/// Production store backed by vectors.
#[derive(Debug, Default, Clone)]
pub struct MemoryProductionStore {
    pub persons: Vec<Person>,
    pub students: Vec<Student>,
    pub leads: Vec<ProductionLead>,
}

impl MemoryProductionStore {
    fn apply_lead(&mut self, write: &Write<ProductionLead>) -> Result<(), StoreError> {
        match write {
            Write::Insert(lead) => {
                if !self.persons.iter().any(|p| p.id == lead.person_id) {
                    return Err(StoreError::Validation(format!(
                        "person {} does not exist",
                        lead.person_id
                    )));
                }
                let taken = self.leads.iter().any(|l| {
                    l.id == lead.id
                        || (l.person_id == lead.person_id
                            && l.program_type == lead.program_type
                            && l.source_file == lead.source_file)
                });
                if taken {
                    return Err(StoreError::Duplicate(format!("lead {} already exists", lead.id)));
                }
                self.leads.push(lead.clone());
            }
            Write::Update(lead) => {
                let slot = self
                    .leads
                    .iter_mut()
                    .find(|l| l.id == lead.id)
                    .ok_or_else(|| StoreError::Other(format!("lead {} not found", lead.id)))?;
                *slot = lead.clone();
            }
            Write::Keep => {}
        }
        Ok(())
    }
}

impl ProductionStore for MemoryProductionStore {
    async fn load_persons(&mut self) -> Result<Vec<Person>, StoreError> {
        Ok(self.persons.clone())
    }

    async fn load_students(&mut self) -> Result<Vec<Student>, StoreError> {
        Ok(self.students.clone())
    }

    async fn load_leads(&mut self) -> Result<Vec<ProductionLead>, StoreError> {
        Ok(self.leads.clone())
    }

    async fn write_student(&mut self, person: &Write<Person>, student: &Write<Student>) -> Result<(), StoreError> {
        let mut persons = self.persons.clone();
        let mut students = self.students.clone();
        apply_person(&mut persons, person)?;
        apply_student(&persons, &mut students, student)?;
        self.persons = persons;
        self.students = students;
        Ok(())
    }

    async fn write_lead(&mut self, person: &Write<Person>, lead: &Write<ProductionLead>) -> Result<(), StoreError> {
        let snapshot = self.persons.clone();
        apply_person(&mut self.persons, person)?;
        if let Err(e) = self.apply_lead(lead) {
            self.persons = snapshot;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataSource, LeadStatus};

    fn lead(name: &str, email: Option<&str>, phone: Option<&str>) -> Lead {
        let mut person = Person::new(name, DataSource::Spreadsheet);
        person.email = email.map(str::to_string);
        person.phone = phone.map(str::to_string);
        person.source_file = Some("leads.xlsx".into());
        person.source_sheet = Some("Hoja1".into());
        Lead::from_person(&person, LeadStatus::New)
    }

    #[tokio::test]
    async fn lead_conflicts_only_touch_status_and_notes() {
        let mut store = MemoryStagingStore::new();
        let first = lead("Ana Gomez", Some("ana@example.com"), None);
        assert_eq!(store.upsert_lead(&first).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_lead(&first).await.unwrap(), UpsertOutcome::Unchanged);

        let mut again = lead("Ana G", Some("ana@example.com"), Some("3001234567"));
        again.status = LeadStatus::Contacted;
        assert_eq!(store.upsert_lead(&again).await.unwrap(), UpsertOutcome::Updated);

        assert_eq!(store.leads.len(), 1);
        assert_eq!(store.leads[0].status, LeadStatus::Contacted);
        assert_eq!(store.leads[0].full_name, "Ana Gomez");
        assert!(store.leads[0].phone.is_none());
    }

    #[tokio::test]
    async fn leads_without_email_are_keyed_by_name_and_phone() {
        let mut store = MemoryStagingStore::new();
        store.upsert_lead(&lead("Luis Perez", None, Some("3001"))).await.unwrap();
        store.upsert_lead(&lead("Luis Perez", None, Some("3002"))).await.unwrap();
        store.upsert_lead(&lead("Luis Perez", None, None)).await.unwrap();
        assert_eq!(
            store.upsert_lead(&lead("Luis Perez", None, Some("3001"))).await.unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(store.leads.len(), 3);
    }

    #[tokio::test]
    async fn national_id_is_unique_across_persons() {
        let mut store = MemoryStagingStore::new();
        let mut a = Person::new("Ana", DataSource::Spreadsheet);
        a.national_id = Some("123456".into());
        let mut b = Person::new("Beatriz", DataSource::Spreadsheet);
        b.national_id = Some("123456".into());

        let sa = Student::new(a.id, "Au Pair", crate::models::StudentStatus::Enrolled);
        store.write_student(&Write::Insert(a), &Write::Insert(sa)).await.unwrap();

        let sb = Student::new(b.id, "Au Pair", crate::models::StudentStatus::Enrolled);
        let err = store
            .write_student(&Write::Insert(b), &Write::Insert(sb))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.persons.len(), 1);
        assert_eq!(store.students.len(), 1);
    }
}

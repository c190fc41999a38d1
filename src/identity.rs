//! Priority-tiered identity resolution.
//!
//! Lookup order: national id, email, name + birth date, name + phone, and
//! name alone as a last resort. A match is merged with the accumulative rule
//! of [`Person::merge_missing`]: only absent fields are filled.
//!
//! Resolution is split in two: [`IdentityIndex::plan`] is a pure decision,
//! [`IdentityIndex::commit`] applies it once the write behind it succeeded.

use chrono::NaiveDate;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::Person;
use crate::normalize::phone_key;

/// A lookup key, ordered from most to least discriminating.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Same record id: the candidate was copied from this person earlier.
    RecordId(Uuid),
    NationalId(String),
    Email(String),
    NameBirthDate(String, NaiveDate),
    NamePhone(String, String),
    NameOnly(String),
}

impl IdentityKey {
    /// 1 is the strongest tier, 5 the weakest.
    pub fn tier(&self) -> u8 {
        match self {
            IdentityKey::RecordId(_) => 0,
            IdentityKey::NationalId(_) => 1,
            IdentityKey::Email(_) => 2,
            IdentityKey::NameBirthDate(..) => 3,
            IdentityKey::NamePhone(..) => 4,
            IdentityKey::NameOnly(_) => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IdentityKey::RecordId(_) => "id",
            IdentityKey::NationalId(_) => "national_id",
            IdentityKey::Email(_) => "email",
            IdentityKey::NameBirthDate(..) => "name+birth_date",
            IdentityKey::NamePhone(..) => "name+phone",
            IdentityKey::NameOnly(_) => "name",
        }
    }
}

/// Keys a person can be found under, strongest first.
///
/// The name-only key is included only when nothing stronger exists.
pub fn lookup_keys(person: &Person) -> Vec<IdentityKey> {
    let mut keys = indexed_keys(person);
    if keys.len() > 1 {
        keys.retain(|k| !matches!(k, IdentityKey::NameOnly(_)));
    }
    keys
}

/// Keys a stored person is registered under, including its name.
fn indexed_keys(person: &Person) -> Vec<IdentityKey> {
    let name = &person.normalized_name;
    let mut keys = Vec::with_capacity(5);
    if let Some(id) = &person.national_id {
        keys.push(IdentityKey::NationalId(id.clone()));
    }
    if let Some(email) = &person.email {
        keys.push(IdentityKey::Email(email.to_lowercase()));
    }
    if let Some(birth_date) = person.birth_date {
        keys.push(IdentityKey::NameBirthDate(name.clone(), birth_date));
    }
    if let Some(phone) = person.phone.as_deref().map(phone_key).filter(|p| !p.is_empty()) {
        keys.push(IdentityKey::NamePhone(name.clone(), phone));
    }
    keys.push(IdentityKey::NameOnly(name.clone()));
    keys
}

/// Decision for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum PersonPlan {
    /// No match: insert the candidate as a new person.
    Create(Person),
    /// Matched and at least one null field gets filled. Holds the merged record.
    Update { person: Person, matched_on: IdentityKey },
    /// Matched and nothing to fill.
    Unchanged { id: Uuid, matched_on: IdentityKey },
}

impl PersonPlan {
    pub fn person_id(&self) -> Uuid {
        match self {
            PersonPlan::Create(person) | PersonPlan::Update { person, .. } => person.id,
            PersonPlan::Unchanged { id, .. } => *id,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, PersonPlan::Create(_))
    }
}

/// In-memory person arena with one map from key to arena slot.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    persons: Vec<Person>,
    by_id: HashMap<Uuid, usize>,
    by_key: HashMap<IdentityKey, usize>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from stored persons, in the order given.
    ///
    /// Earlier persons win key collisions, so callers pass them in creation order.
    pub fn from_persons(persons: impl IntoIterator<Item = Person>) -> Self {
        let mut index = Self::new();
        for person in persons {
            index.insert(person);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<&Person> {
        self.by_id.get(id).map(|slot| &self.persons[*slot])
    }

    /// Finds the stored person a candidate resolves to, and the key that matched.
    ///
    /// A stored person with the candidate's own id always matches. Otherwise a
    /// match is rejected when both sides carry different national ids.
    pub fn resolve(&self, candidate: &Person) -> Option<(&Person, IdentityKey)> {
        if let Some(existing) = self.get(&candidate.id) {
            return Some((existing, IdentityKey::RecordId(candidate.id)));
        }
        lookup_keys(candidate).into_iter().find_map(|key| {
            let existing = &self.persons[*self.by_key.get(&key)?];
            match (&existing.national_id, &candidate.national_id) {
                (Some(a), Some(b)) if a != b => None,
                _ => Some((existing, key)),
            }
        })
    }

    /// Decides what to do with a candidate without touching the index.
    pub fn plan(&self, candidate: &Person) -> PersonPlan {
        match self.resolve(candidate) {
            None => PersonPlan::Create(candidate.clone()),
            Some((existing, matched_on)) => {
                let mut merged = existing.clone();
                if merged.merge_missing(candidate) {
                    PersonPlan::Update {
                        person: merged,
                        matched_on,
                    }
                } else {
                    PersonPlan::Unchanged {
                        id: existing.id,
                        matched_on,
                    }
                }
            }
        }
    }

    /// Applies a plan produced by [`plan`](Self::plan).
    pub fn commit(&mut self, plan: &PersonPlan) {
        match plan {
            PersonPlan::Create(person) => self.insert(person.clone()),
            PersonPlan::Update { person, .. } => self.replace(person.clone()),
            PersonPlan::Unchanged { .. } => {}
        }
    }

    /// Plan and commit in one step, for purely in-memory deduplication.
    pub fn upsert(&mut self, candidate: &Person) -> PersonPlan {
        let plan = self.plan(candidate);
        self.commit(&plan);
        plan
    }

    /// Replaces a stored person, e.g. after a direct field update.
    pub fn replace(&mut self, person: Person) {
        match self.by_id.get(&person.id).copied() {
            Some(slot) => {
                self.persons[slot] = person;
                self.register(slot);
            }
            None => self.insert(person),
        }
    }

    fn insert(&mut self, person: Person) {
        if self.by_id.contains_key(&person.id) {
            self.replace(person);
            return;
        }
        let slot = self.persons.len();
        self.by_id.insert(person.id, slot);
        self.persons.push(person);
        self.register(slot);
    }

    /// Registers every key of the slot's person, never stealing taken keys.
    fn register(&mut self, slot: usize) {
        for key in indexed_keys(&self.persons[slot]) {
            self.by_key.entry(key).or_insert(slot);
        }
    }
}

//! NDJSON fixtures written to a temporary MIMIC-style data directory.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use tempfile::TempDir;

/// Writes one NDJSON file.
pub fn write_ndjson(dir: &Path, name: &str, records: &[Value]) {
    let body: Vec<String> = records.iter().map(Value::to_string).collect();
    fs::write(dir.join(name), body.join("\n") + "\n").unwrap();
}

pub fn patient(id: &str, gender: &str, birth_date: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "gender": gender,
        "birthDate": birth_date,
        "name": [{"family": format!("Patient_{id}")}],
        "managingOrganization": {"reference": "Organization/org1"},
    })
}

pub fn observation(id: &str, patient: &str, category: &str, when: &str, interpretation: Option<&str>) -> Value {
    let mut value = json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "category": [{"coding": [{
            "system": "http://terminology.hl7.org/CodeSystem/observation-category",
            "code": category,
        }]}],
        "code": {"coding": [{"system": "http://loinc.org", "code": "718-7"}], "text": "Hemoglobin"},
        "subject": {"reference": format!("Patient/{patient}")},
        "effectiveDateTime": when,
    });
    if let Some(code) = interpretation {
        value["interpretation"] = json!([{"coding": [{
            "system": "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation",
            "code": code,
        }]}]);
    }
    value
}

pub fn encounter(id: &str, patient: &str, class: &str, start: &str) -> Value {
    json!({
        "resourceType": "Encounter",
        "id": id,
        "status": "finished",
        "class": {"system": "http://terminology.hl7.org/CodeSystem/v3-ActCode", "code": class},
        "subject": {"reference": format!("Patient/{patient}")},
        "period": {"start": start},
        "serviceProvider": {"reference": "Organization/org1"},
    })
}

pub fn condition(id: &str, patient: &str, encounter: &str, text: &str) -> Value {
    json!({
        "resourceType": "Condition",
        "id": id,
        "category": [{"coding": [{"code": "encounter-diagnosis"}]}],
        "code": {"coding": [{"system": "http://hl7.org/fhir/sid/icd-10", "code": "I10"}], "text": text},
        "subject": {"reference": format!("Patient/{patient}")},
        "encounter": {"reference": format!("Encounter/{encounter}")},
    })
}

/// A small dataset using the MIMIC file names.
///
/// Patients p1..p3; p1 has two observations (one abnormal), p2 has three,
/// p3 has none. The ED vital-signs file holds the third record for p2.
pub fn mimic_fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path();

    write_ndjson(
        path,
        "MimicOrganization.ndjson",
        &[json!({"resourceType": "Organization", "id": "org1", "name": "Beth Israel"})],
    );
    write_ndjson(
        path,
        "MimicPatient.ndjson",
        &[
            patient("p1", "female", "2100-04-01"),
            patient("p2", "male", "2085-11-12"),
            patient("p3", "female", "2110-01-30"),
        ],
    );
    write_ndjson(
        path,
        "MimicEncounter.ndjson",
        &[
            encounter("enc1", "p1", "IMP", "2180-07-20T10:00:00-04:00"),
            encounter("enc2", "p2", "AMB", "2180-08-01T09:00:00-04:00"),
        ],
    );
    write_ndjson(path, "MimicEncounterED.ndjson", &[encounter("enc3", "p2", "EMER", "2180-08-03T21:00:00-04:00")]);
    write_ndjson(path, "MimicEncounterICU.ndjson", &[]);
    write_ndjson(
        path,
        "MimicObservationLabevents.ndjson",
        &[
            observation("e1", "p1", "laboratory", "2180-07-21T08:00:00-04:00", Some("A")),
            observation("o-p2-1", "p2", "laboratory", "2180-08-01T10:00:00-04:00", Some("HH")),
            observation("e2", "p1", "laboratory", "2180-07-22T08:00:00-04:00", None),
            observation("o-p2-2", "p2", "laboratory", "2180-08-02T10:00:00-04:00", Some("H")),
        ],
    );
    write_ndjson(
        path,
        "MimicObservationVitalSignsED.ndjson",
        &[observation("o-p2-3", "p2", "vital-signs", "2180-08-03T22:00:00-04:00", None)],
    );
    for name in [
        "MimicObservationChartevents",
        "MimicObservationDatetimeevents",
        "MimicObservationOutputevents",
        "MimicObservationED",
        "MimicObservationMicroTest",
        "MimicObservationMicroOrg",
        "MimicObservationMicroSusc",
    ] {
        write_ndjson(path, &format!("{name}.ndjson"), &[]);
    }
    write_ndjson(
        path,
        "MimicCondition.ndjson",
        &[condition("c1", "p2", "enc2", "Essential hypertension")],
    );
    write_ndjson(path, "MimicConditionED.ndjson", &[]);
    dir
}

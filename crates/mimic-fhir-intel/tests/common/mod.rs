//! A small MIMIC-style data directory for service tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use tempfile::TempDir;

pub fn write_ndjson(dir: &Path, name: &str, records: &[Value]) {
    let body: Vec<String> = records.iter().map(Value::to_string).collect();
    fs::write(dir.join(name), body.join("\n") + "\n").unwrap();
}

fn observation(id: &str, patient: &str, when: &str, interpretation: Option<&str>) -> Value {
    let mut value = json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "category": [{"coding": [{"code": "laboratory"}]}],
        "subject": {"reference": format!("Patient/{patient}")},
        "effectiveDateTime": when,
    });
    if let Some(code) = interpretation {
        value["interpretation"] = json!([{"coding": [{"code": code}]}]);
    }
    value
}

fn encounter(id: &str, patient: &str, class: &str, start: &str) -> Value {
    json!({
        "resourceType": "Encounter",
        "id": id,
        "class": {"code": class},
        "subject": {"reference": format!("Patient/{patient}")},
        "period": {"start": start},
    })
}

/// Three patients with these scores:
///
/// - p1: 30 + abnormal 2 + IMP 3 = 35 (low)
/// - p2: 30 + critical 5 + abnormal 2 + condition 3 + EMER 4 = 44 (moderate)
/// - p3: 30 (low)
///
/// Procedure, Medication*, Location and Specimen files are absent.
pub fn fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path();

    write_ndjson(
        path,
        "MimicOrganization.ndjson",
        &[json!({"resourceType": "Organization", "id": "org1"})],
    );
    write_ndjson(
        path,
        "MimicPatient.ndjson",
        &[
            json!({"resourceType": "Patient", "id": "p1", "gender": "female", "birthDate": "2100-04-01"}),
            json!({"resourceType": "Patient", "id": "p2", "gender": "male"}),
            json!({"resourceType": "Patient", "id": "p3"}),
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
    write_ndjson(
        path,
        "MimicEncounterED.ndjson",
        &[encounter("enc3", "p2", "EMER", "2180-08-03T21:00:00-04:00")],
    );
    write_ndjson(path, "MimicEncounterICU.ndjson", &[]);
    write_ndjson(
        path,
        "MimicObservationLabevents.ndjson",
        &[
            observation("e1", "p1", "2180-07-21T08:00:00-04:00", Some("A")),
            observation("o-p2-1", "p2", "2180-08-01T10:00:00-04:00", Some("HH")),
            observation("e2", "p1", "2180-07-22T08:00:00-04:00", None),
            observation("o-p2-2", "p2", "2180-08-02T10:00:00-04:00", Some("H")),
        ],
    );
    for name in [
        "MimicObservationChartevents",
        "MimicObservationDatetimeevents",
        "MimicObservationOutputevents",
        "MimicObservationED",
        "MimicObservationVitalSignsED",
        "MimicObservationMicroTest",
        "MimicObservationMicroOrg",
        "MimicObservationMicroSusc",
    ] {
        write_ndjson(path, &format!("{name}.ndjson"), &[]);
    }
    write_ndjson(
        path,
        "MimicCondition.ndjson",
        &[json!({
            "resourceType": "Condition",
            "id": "c1",
            "code": {"text": "Essential hypertension"},
            "subject": {"reference": "Patient/p2"},
            "encounter": {"reference": "Encounter/enc2"},
        })],
    );
    write_ndjson(path, "MimicConditionED.ndjson", &[]);
    dir
}

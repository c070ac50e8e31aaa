//! Fee structure catalog: creation, fan-out, duplicates and retirement.

mod common;

use common::{grade_structure, uuid_of, Caller, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
#[ignore]
async fn mandatory_structure_fans_out_to_students_in_grade() {
    let app = TestApp::spawn().await;
    let admin = Caller::admin();

    let year = app.seed_academic_year(true).await;
    let grade = Uuid::new_v4();
    let other_grade = Uuid::new_v4();
    let first = app.seed_student(year, grade, None).await;
    let second = app.seed_student(year, grade, Some(Uuid::new_v4())).await;
    app.seed_student(year, other_grade, None).await;

    let created = app
        .create_structure(admin, grade_structure(year, Uuid::new_v4(), grade, "5000.00"))
        .await;

    assert_eq!(created["structure"]["scope"], "grade");
    assert_eq!(created["structure"]["lifecycle"], "active");
    assert_eq!(created["assignments"]["created"].as_array().unwrap().len(), 2);
    assert!(created["assignments"]["failed"].as_array().unwrap().is_empty());

    for student in [first, second] {
        let assignments = app
            .state
            .engine
            .list_assignments(student, false)
            .await
            .unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].total_amount, assignments[0].pending_amount);
    }

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn optional_structure_is_not_fanned_out() {
    let app = TestApp::spawn().await;
    let year = app.seed_academic_year(true).await;
    let grade = Uuid::new_v4();
    app.seed_student(year, grade, None).await;

    let mut body = grade_structure(year, Uuid::new_v4(), grade, "1200.00");
    body["is_mandatory"] = json!(false);
    let created = app.create_structure(Caller::admin(), body).await;

    assert!(created["assignments"]["created"].as_array().unwrap().is_empty());

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn duplicate_grade_structure_is_a_conflict() {
    let app = TestApp::spawn().await;
    let admin = Caller::admin();
    let year = app.seed_academic_year(true).await;
    let grade = Uuid::new_v4();
    let category = Uuid::new_v4();

    let first = app
        .create_structure(admin, grade_structure(year, category, grade, "5000.00"))
        .await;
    let first_id = uuid_of(&first["structure"]["id"]);

    let response = app
        .post(admin, "/fee-structures", grade_structure(year, category, grade, "5500.00"))
        .await;
    assert_eq!(response.status().as_u16(), 409);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "duplicate_structure");
    assert_eq!(uuid_of(&body["details"]["existing_id"]), first_id);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn more_specific_structure_keeps_its_students() {
    let app = TestApp::spawn().await;
    let admin = Caller::admin();
    let year = app.seed_academic_year(true).await;
    let grade = Uuid::new_v4();
    let division_a = Uuid::new_v4();
    let category = Uuid::new_v4();

    let in_a = app.seed_student(year, grade, Some(division_a)).await;
    let in_b = app.seed_student(year, grade, Some(Uuid::new_v4())).await;

    let division_body = json!({
        "academic_year_id": year,
        "fee_category_id": category,
        "grade_id": grade,
        "division_id": division_a,
        "amount": "4500.00",
        "due_date": "2099-06-30",
    });
    let division = app.create_structure(admin, division_body).await;
    assert_eq!(division["structure"]["scope"], "division");
    assert_eq!(division["assignments"]["created"].as_array().unwrap().len(), 1);

    let grade_wide = app
        .create_structure(admin, grade_structure(year, category, grade, "5000.00"))
        .await;
    assert_eq!(grade_wide["assignments"]["created"].as_array().unwrap().len(), 1);

    let a = app.state.engine.list_assignments(in_a, false).await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].fee_structure_id, uuid_of(&division["structure"]["id"]));

    let b = app.state.engine.list_assignments(in_b, false).await.unwrap();
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].fee_structure_id, uuid_of(&grade_wide["structure"]["id"]));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn invalid_structures_are_rejected() {
    let app = TestApp::spawn().await;
    let admin = Caller::admin();
    let year = app.seed_academic_year(true).await;

    let negative = grade_structure(year, Uuid::new_v4(), Uuid::new_v4(), "-10");
    let response = app.post(admin, "/fee-structures", negative).await;
    assert_eq!(response.status().as_u16(), 422);

    let oversized = grade_structure(year, Uuid::new_v4(), Uuid::new_v4(), "99999999999.00");
    let response = app.post(admin, "/fee-structures", oversized).await;
    assert_eq!(response.status().as_u16(), 422);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["details"]["field"], "amount");

    let orphan_division = json!({
        "academic_year_id": year,
        "fee_category_id": Uuid::new_v4(),
        "division_id": Uuid::new_v4(),
        "amount": "100",
        "due_date": "2099-06-30",
    });
    let response = app.post(admin, "/fee-structures", orphan_division).await;
    assert_eq!(response.status().as_u16(), 422);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["details"]["field"], "division_id");

    let response = app
        .post(
            Caller::staff(),
            "/fee-structures",
            grade_structure(year, Uuid::new_v4(), Uuid::new_v4(), "100"),
        )
        .await;
    assert_eq!(response.status().as_u16(), 403);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn retiring_a_structure_keeps_assignments_and_frees_the_slot() {
    let app = TestApp::spawn().await;
    let admin = Caller::admin();
    let year = app.seed_academic_year(true).await;
    let grade = Uuid::new_v4();
    let category = Uuid::new_v4();
    let student = app.seed_student(year, grade, None).await;

    let created = app
        .create_structure(admin, grade_structure(year, category, grade, "5000.00"))
        .await;
    let structure_id = uuid_of(&created["structure"]["id"]);

    let path = format!("/fee-structures/{}/deactivate", structure_id);
    let response = app.post(admin, &path, json!({ "lifecycle": "superseded" })).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["lifecycle"], "superseded");

    let again = app.post(admin, &path, json!({})).await;
    assert_eq!(again.status().as_u16(), 422);

    let assignments = app.state.engine.list_assignments(student, false).await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].fee_structure_id, structure_id);

    // The grade-wide slot is free again
    app.create_structure(admin, grade_structure(year, category, grade, "5200.00"))
        .await;

    let response = app
        .get(
            Caller::staff(),
            &format!("/fee-structures?academic_year_id={}&lifecycle=active", year),
        )
        .await;
    let listed: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["amount"], "5200.00");

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn unknown_structure_is_not_found() {
    let app = TestApp::spawn().await;

    let response = app
        .get(Caller::staff(), &format!("/fee-structures/{}", Uuid::new_v4()))
        .await;
    assert_eq!(response.status().as_u16(), 404);

    app.cleanup().await;
}

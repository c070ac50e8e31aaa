//! Assignment engine: enrollment, idempotence, grade change and summaries.

mod common;

use common::{dec_of, grade_structure, uuid_of, Caller, TestApp};
use fee_ledger_service::models::{AssignOutcome, AssignmentStatus};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
#[ignore]
async fn enrollment_assigns_mandatory_grade_structure() {
    let app = TestApp::spawn().await;
    let year = app.seed_academic_year(true).await;
    let grade = Uuid::new_v4();

    app.create_structure(
        Caller::admin(),
        grade_structure(year, Uuid::new_v4(), grade, "5000.00"),
    )
    .await;
    let mut optional = grade_structure(year, Uuid::new_v4(), grade, "800.00");
    optional["is_mandatory"] = json!(false);
    app.create_structure(Caller::admin(), optional).await;

    let student = app.seed_student(year, grade, None).await;
    let response = app
        .post(Caller::staff(), &format!("/students/{}/enrollment", student), json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let batch: serde_json::Value = response.json().await.unwrap();
    assert_eq!(batch["created"].as_array().unwrap().len(), 1);

    let assignments = app.state.engine.list_assignments(student, false).await.unwrap();
    assert_eq!(assignments.len(), 1);
    let assignment = &assignments[0];
    assert_eq!(assignment.total_amount, dec!(5000.00));
    assert_eq!(assignment.paid_amount, dec!(0));
    assert_eq!(assignment.pending_amount, dec!(5000.00));
    assert_eq!(assignment.status, AssignmentStatus::Pending);

    // Enrolling again changes nothing
    let again = app.state.engine.enroll(student).await.unwrap();
    assert!(again.created.is_empty());
    assert_eq!(again.existing.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn grade_semester_structure_displaces_universal_of_same_category() {
    let app = TestApp::spawn().await;
    let year = app.seed_academic_year(true).await;
    let grade = Uuid::new_v4();
    let tuition = Uuid::new_v4();

    let mut universal = grade_structure(year, tuition, grade, "8000.00");
    universal.as_object_mut().unwrap().remove("grade_id");
    app.create_structure(Caller::admin(), universal).await;

    let mut first_semester = grade_structure(year, tuition, grade, "5000.00");
    first_semester["semester"] = json!("Semester 1");
    app.create_structure(Caller::admin(), first_semester).await;

    let student = app.seed_student(year, grade, None).await;
    let batch = app.state.engine.enroll(student).await.unwrap();
    assert_eq!(batch.created.len(), 1);

    let assignments = app.state.engine.list_assignments(student, false).await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].total_amount, dec!(5000.00));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn assigning_twice_yields_one_assignment() {
    let app = TestApp::spawn().await;
    let year = app.seed_academic_year(true).await;
    let grade = Uuid::new_v4();
    let student = app.seed_student(year, grade, None).await;

    let mut optional = grade_structure(year, Uuid::new_v4(), grade, "800.00");
    optional["is_mandatory"] = json!(false);
    let created = app.create_structure(Caller::admin(), optional).await;
    let structure_id = uuid_of(&created["structure"]["id"]);

    let first = app.state.engine.assign_structure(student, structure_id).await.unwrap();
    let second = app.state.engine.assign_structure(student, structure_id).await.unwrap();
    assert!(matches!(first, AssignOutcome::Created(_)));
    assert_eq!(second, AssignOutcome::Existing(first.assignment_id()));

    let path = format!("/students/{}/fee-assignments", student);
    let response = app
        .post(Caller::staff(), &path, json!({ "fee_structure_id": structure_id }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["created"], false);
    assert_eq!(uuid_of(&body["assignment_id"]), first.assignment_id());

    let assignments = app.state.engine.list_assignments(student, true).await.unwrap();
    assert_eq!(assignments.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn concurrent_assignment_converges_on_one_row() {
    let app = TestApp::spawn().await;
    let year = app.seed_academic_year(true).await;
    let grade = Uuid::new_v4();
    let student = app.seed_student(year, grade, None).await;

    let mut optional = grade_structure(year, Uuid::new_v4(), grade, "300.00");
    optional["is_mandatory"] = json!(false);
    let created = app.create_structure(Caller::admin(), optional).await;
    let structure_id = uuid_of(&created["structure"]["id"]);

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let engine = app.state.engine.clone();
            tokio::spawn(async move { engine.assign_structure(student, structure_id).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().assignment_id());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn grade_change_cancels_only_unpaid_assignments() {
    let app = TestApp::spawn().await;
    let admin = Caller::admin();
    let staff = Caller::staff();
    let year = app.seed_academic_year(true).await;
    let old_grade = Uuid::new_v4();
    let new_grade = Uuid::new_v4();
    let tuition = Uuid::new_v4();
    let transport = Uuid::new_v4();

    let student = app.seed_student(year, old_grade, None).await;
    app.create_structure(admin, grade_structure(year, tuition, old_grade, "5000.00"))
        .await;
    app.create_structure(admin, grade_structure(year, transport, old_grade, "1000.00"))
        .await;
    let new_tuition = app
        .create_structure(admin, grade_structure(year, tuition, new_grade, "6000.00"))
        .await;

    let before = app.state.engine.list_assignments(student, false).await.unwrap();
    assert_eq!(before.len(), 2);
    let transport_assignment = before
        .iter()
        .find(|a| a.total_amount == dec!(1000.00))
        .unwrap();

    app.collect(
        staff,
        json!({
            "student_id": student,
            "assignment_id": transport_assignment.id,
            "amount": "400.00",
            "payment_method": "cash",
        }),
    )
    .await;

    app.move_student(student, new_grade, None).await;
    let response = app
        .post(
            staff,
            &format!("/students/{}/grade-change", student),
            json!({ "new_grade_id": new_grade }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let batch: serde_json::Value = response.json().await.unwrap();
    assert_eq!(batch["cancelled"].as_array().unwrap().len(), 1);
    assert_eq!(batch["created"].as_array().unwrap().len(), 1);

    let live = app.state.engine.list_assignments(student, false).await.unwrap();
    assert_eq!(live.len(), 2);
    let partial = live.iter().find(|a| a.id == transport_assignment.id).unwrap();
    assert_eq!(partial.status, AssignmentStatus::Partial);
    assert_eq!(partial.paid_amount, dec!(400.00));
    assert!(live
        .iter()
        .any(|a| a.fee_structure_id == uuid_of(&new_tuition["structure"]["id"])));

    let all = app.state.engine.list_assignments(student, true).await.unwrap();
    let cancelled: Vec<_> = all.iter().filter(|a| a.is_cancelled()).collect();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].total_amount, dec!(5000.00));
    assert!(cancelled[0].cancelled_reason.is_some());
    assert!(cancelled[0].cancelled_utc.is_some());

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn fee_summary_groups_totals_and_lists_open_optionals() {
    let app = TestApp::spawn().await;
    let admin = Caller::admin();
    let year = app.seed_academic_year(true).await;
    let grade = Uuid::new_v4();
    let student = app.seed_student(year, grade, None).await;

    let mut first_term = grade_structure(year, Uuid::new_v4(), grade, "3000.00");
    first_term["semester"] = json!("Semester 1");
    app.create_structure(admin, first_term).await;
    let mut second_term = grade_structure(year, Uuid::new_v4(), grade, "2000.00");
    second_term["semester"] = json!("Semester 2");
    app.create_structure(admin, second_term).await;
    let mut optional = grade_structure(year, Uuid::new_v4(), grade, "750.00");
    optional["is_mandatory"] = json!(false);
    let optional = app.create_structure(admin, optional).await;

    let response = app
        .get(Caller::parent(), &format!("/students/{}/fee-summary", student))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let summary: serde_json::Value = response.json().await.unwrap();

    assert_eq!(summary["mandatory"]["count"], 2);
    assert_eq!(dec_of(&summary["mandatory"]["total"]), dec!(5000.00));
    assert_eq!(dec_of(&summary["grand_total"]["pending"]), dec!(5000.00));
    assert_eq!(summary["optional"]["count"], 0);

    let semesters = summary["semesters"].as_array().unwrap();
    assert_eq!(semesters.len(), 2);
    assert_eq!(semesters[0]["semester"], "Semester 1");
    assert_eq!(dec_of(&semesters[0]["mandatory"]["total"]), dec!(3000.00));

    let available = summary["available_optional"].as_array().unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0]["id"], optional["structure"]["id"]);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn unknown_student_has_no_summary() {
    let app = TestApp::spawn().await;

    let response = app
        .get(Caller::parent(), &format!("/students/{}/fee-summary", Uuid::new_v4()))
        .await;
    assert_eq!(response.status().as_u16(), 404);

    let response = app
        .post(
            Caller::staff(),
            &format!("/students/{}/enrollment", Uuid::new_v4()),
            json!({}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);

    app.cleanup().await;
}

#[macro_use]
mod common;

use std::rc::Rc;

use actix_web::http::StatusCode;
use actix_web::test;
use serde_json::{json, Value};

use common::grant;
use utilityops::store::{ComplaintStore, ValveStore};

#[actix_web::test]
async fn valve_updates_leave_an_audit_trail() {
    let ctx = common::context();
    let role = ctx.role("operator", vec![grant("valves", [true, true, true, false], true)]);
    let operator = ctx.user("operator@ward.gov", Some(role.id), false);
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/valves/")
        .insert_header(ctx.bearer(&operator))
        .set_json(json!({
            "name": "V-12",
            "size": "150mm",
            "full_open_condition": "12 turns",
            "current_condition": "open",
            "remarks": ""
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let valve: Value = test::read_body_json(res).await;
    assert_eq!(valve["location_type"], "coordinates");
    let id = valve["id"].as_i64().unwrap();

    let req = test::TestRequest::patch()
        .uri(&format!("/api/valves/{}/", id))
        .insert_header(ctx.bearer(&operator))
        .set_json(json!({ "name": "V-12", "current_condition": "closed", "remarks": "Shut for repair" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let updated: Value = test::read_body_json(res).await;
    assert_eq!(updated["current_condition"], "closed");

    let req = test::TestRequest::get()
        .uri(&format!("/api/logs/?valve_id={}", id))
        .insert_header(ctx.bearer(&operator))
        .to_request();
    let logs: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    let fields: Vec<&str> = logs.iter().map(|l| l["changed_field"].as_str().unwrap()).collect();
    assert_eq!(fields, vec!["current_condition", "remarks"]);
    assert_eq!(logs[0]["old_value"], "open");
    assert_eq!(logs[0]["new_value"], "closed");
    assert_eq!(logs[0]["user"], operator.id);
    assert_eq!(logs[0]["valve"], id);

    let req = test::TestRequest::get()
        .uri("/api/logs/")
        .insert_header(ctx.bearer(&operator))
        .to_request();
    let unfiltered: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert!(unfiltered.is_empty());

    // Deletion is not granted
    let req = test::TestRequest::delete()
        .uri(&format!("/api/valves/{}/", id))
        .insert_header(ctx.bearer(&operator))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(ctx.state.valves.list_valve_logs(id as i32).unwrap().len(), 2);
}

#[actix_web::test]
async fn unchanged_valve_fields_are_not_logged() {
    let ctx = common::context();
    let root = ctx.user("root@ward.gov", None, true);
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/valves/")
        .insert_header(ctx.bearer(&root))
        .set_json(json!({
            "name": "V-3",
            "size": "100mm",
            "full_open_condition": "8 turns",
            "current_condition": "open",
            "remarks": "",
            "latitude": 18.52
        }))
        .to_request();
    let valve: Value = test::call_and_read_body_json(&app, req).await;
    let id = valve["id"].as_i64().unwrap();

    let req = test::TestRequest::put()
        .uri(&format!("/api/valves/{}/", id))
        .insert_header(ctx.bearer(&root))
        .set_json(json!({ "current_condition": "open", "latitude": 18.52 }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    assert!(ctx.state.valves.list_valve_logs(id as i32).unwrap().is_empty());

    let req = test::TestRequest::put()
        .uri(&format!("/api/valves/{}/", id))
        .insert_header(ctx.bearer(&root))
        .set_json(json!({ "location_type": "satellite" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn concurrent_complaints_get_gapless_tickets() {
    let ctx = common::context();
    let root = ctx.user("root@ward.gov", None, true);
    let area = ctx.area("Ward 9");
    let app = Rc::new(init_app!(ctx));

    let mut tasks = Vec::new();
    for n in 0..50 {
        let app = app.clone();
        let header = ctx.bearer(&root);
        let body = json!({
            "area": area.id,
            "complaint_type": "pressure",
            "name": format!("Resident {}", n),
            "address": "Block C",
            "phone_number": "020555000",
            "department": "water"
        });
        tasks.push(tokio::task::spawn_local(async move {
            let req = test::TestRequest::post()
                .uri("/api/complaints/")
                .insert_header(header)
                .set_json(body)
                .to_request();
            test::call_service(app.as_ref(), req).await.status()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::CREATED);
    }

    let mut tickets: Vec<String> = ctx
        .state
        .complaints
        .list_complaints(&Default::default())
        .unwrap()
        .into_iter()
        .map(|c| c.ticket_number)
        .collect();
    tickets.sort();
    let expected: Vec<String> = (1..=50).map(|n| format!("WAR{:03}", n)).collect();
    assert_eq!(tickets, expected);
}

#[actix_web::test]
async fn complaints_validate_area_and_phone_number() {
    let ctx = common::context();
    let root = ctx.user("root@ward.gov", None, true);
    let area = ctx.area("Ward 2");
    let app = init_app!(ctx);

    let complaint = |area: Value, phone: &str| {
        json!({
            "area": area,
            "complaint_type": "leak",
            "name": "S. Rao",
            "address": "Lane 1",
            "phone_number": phone,
            "department": "water"
        })
    };

    let req = test::TestRequest::post()
        .uri("/api/complaints/")
        .insert_header(ctx.bearer(&root))
        .set_json(complaint(Value::Null, "12345"))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "area: Area field is required.");

    let req = test::TestRequest::post()
        .uri("/api/complaints/")
        .insert_header(ctx.bearer(&root))
        .set_json(complaint(json!(area.id), "1234567890123456"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    assert!(ctx.state.complaints.list_complaints(&Default::default()).unwrap().is_empty());
}

#[actix_web::test]
async fn deleting_an_area_removes_its_complaints() {
    let ctx = common::context();
    let root = ctx.user("root@ward.gov", None, true);
    let area = ctx.area("Ward 7");
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/complaints/")
        .insert_header(ctx.bearer(&root))
        .set_json(json!({
            "area": area.id,
            "complaint_type": "leak",
            "name": "K. Shah",
            "address": "Lane 9",
            "phone_number": "5550100",
            "department": "water",
            "date": "2024-05-30"
        }))
        .to_request();
    let complaint: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(complaint["date"], "2024-05-30");

    let req = test::TestRequest::delete()
        .uri(&format!("/api/add-area/{}/", area.id))
        .insert_header(ctx.bearer(&root))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get()
        .uri(&format!("/api/complaints/{}/", complaint["id"]))
        .insert_header(ctx.bearer(&root))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn connections_filter_and_carry_type_details() {
    let ctx = common::context();
    let role = ctx.role("engineer", vec![grant("e-tapp", [true, true, true, true], true)]);
    let engineer = ctx.user("engineer@ward.gov", Some(role.id), false);
    let app = init_app!(ctx);

    let mut type_ids = Vec::new();
    for name in ["Domestic", "Commercial"] {
        let req = test::TestRequest::post()
            .uri("/api/connection-types/")
            .insert_header(ctx.bearer(&engineer))
            .set_json(json!({ "name": name }))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        type_ids.push(created["id"].as_i64().unwrap());
    }

    for (name, file_number, type_id) in [
        ("Ravi Patil", "F-100", type_ids[0]),
        ("Sunita Patel", "F-101", type_ids[1]),
        ("Imran Khan", "F-102", type_ids[0]),
    ] {
        let req = test::TestRequest::post()
            .uri("/api/connections/")
            .insert_header(ctx.bearer(&engineer))
            .set_json(json!({
                "name": name,
                "address": "Sector 4",
                "file_number": file_number,
                "area": "North",
                "connection_type": type_id
            }))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(res).await;
        assert_eq!(created["status"], "assistant_engineer");
        assert_eq!(created["connection_type_detail"]["id"], type_id);
    }

    let req = test::TestRequest::get()
        .uri("/api/connections/?name=pat&ordering=-created_at")
        .insert_header(ctx.bearer(&engineer))
        .to_request();
    let rows: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Sunita Patel", "Ravi Patil"]);

    let req = test::TestRequest::get()
        .uri(&format!("/api/connections/?connection_type={}", type_ids[0]))
        .insert_header(ctx.bearer(&engineer))
        .to_request();
    let rows: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["connection_type_detail"]["name"] == "Domestic"));

    let req = test::TestRequest::post()
        .uri("/api/connections/")
        .insert_header(ctx.bearer(&engineer))
        .set_json(json!({
            "name": "Duplicate",
            "address": "Sector 4",
            "file_number": "F-100",
            "area": "North",
            "connection_type": type_ids[1]
        }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    // A type still used by a connection cannot go
    let req = test::TestRequest::delete()
        .uri(&format!("/api/connection-types/{}/", type_ids[0]))
        .insert_header(ctx.bearer(&engineer))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn conversions_describe_both_connection_types() {
    let ctx = common::context();
    let root = ctx.user("root@ward.gov", None, true);
    let app = init_app!(ctx);

    let mut type_ids = Vec::new();
    for name in ["Domestic", "Commercial"] {
        let req = test::TestRequest::post()
            .uri("/api/connection-types/")
            .insert_header(ctx.bearer(&root))
            .set_json(json!({ "name": name }))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        type_ids.push(created["id"].as_i64().unwrap());
    }

    let req = test::TestRequest::post()
        .uri("/api/conversions/")
        .insert_header(ctx.bearer(&root))
        .set_json(json!({
            "name": "Hotel Sagar",
            "address": "Main Road",
            "file_number": "C-1",
            "area": "Market",
            "from_connection_type": type_ids[0],
            "to_connection_type": type_ids[1]
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let conversion: Value = test::read_body_json(res).await;
    assert_eq!(conversion["from_connection_type_detail"]["name"], "Domestic");
    assert_eq!(conversion["to_connection_type_detail"]["name"], "Commercial");
    assert_eq!(conversion["created_by"], root.id);

    let req = test::TestRequest::get()
        .uri("/api/conversions/?area=Market")
        .insert_header(ctx.bearer(&root))
        .to_request();
    let rows: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(rows.len(), 1);

    let req = test::TestRequest::get()
        .uri("/api/conversions/?area=Mark")
        .insert_header(ctx.bearer(&root))
        .to_request();
    let rows: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert!(rows.is_empty());
}

#[actix_web::test]
async fn health_answers_without_a_token() {
    let ctx = common::context();
    let app = init_app!(ctx);

    let req = test::TestRequest::get().uri("/api/health").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["timestamp"].is_string());
}

#[actix_web::test]
async fn malformed_filters_are_validation_errors() {
    let ctx = common::context();
    let root = ctx.user("root@ward.gov", None, true);
    let app = init_app!(ctx);

    let req = test::TestRequest::get()
        .uri("/api/connections/?date_gte=yesterday")
        .insert_header(ctx.bearer(&root))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert!(body["error"].is_string());
}

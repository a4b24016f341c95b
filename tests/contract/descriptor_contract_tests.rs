//! Contract tests for the session descriptor printed to the client.

use std::path::PathBuf;

use serde_json::Value;
use session_warden::orchestrator::coordinator::SessionDescriptor;

#[test]
fn descriptor_serializes_with_snake_case_fields() {
    let descriptor = SessionDescriptor {
        instance_id: "shared".into(),
        strategy: "shared".into(),
        session_path: PathBuf::from("/srv/sessions/.auth_shared"),
        lock_path: PathBuf::from("/srv/sessions/.session.lock"),
        pid: 1234,
        requires_auth: true,
    };
    let json: Value = serde_json::to_value(&descriptor).expect("json");

    assert_eq!(json["instance_id"], "shared");
    assert_eq!(json["strategy"], "shared");
    assert_eq!(json["session_path"], "/srv/sessions/.auth_shared");
    assert_eq!(json["lock_path"], "/srv/sessions/.session.lock");
    assert_eq!(json["pid"], 1234);
    assert_eq!(json["requires_auth"], true);
    assert_eq!(json.as_object().map(serde_json::Map::len), Some(6));
}

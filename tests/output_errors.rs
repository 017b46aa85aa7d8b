use deploy_manager::error::{
    MergeConflictDetails, ModuleNotRegisteredDetails, RemoteCommandFailedDetails, TargetDetails,
};
use deploy_manager::output::{map_cmd_result_to_json, CliResponse};
use deploy_manager::Error;

#[test]
fn remote_command_failed_serializes_stdout_stderr() {
    let err = Error::remote_command_failed(RemoteCommandFailedDetails {
        command: "sas -sysin 'get_module_path.sas'".to_string(),
        exit_code: 127,
        stdout: "some stdout".to_string(),
        stderr: "some stderr".to_string(),
        target: TargetDetails {
            host: Some("sas.example.com".to_string()),
            user: Some("deploy".to_string()),
        },
    });

    let json = CliResponse::<()>::from_error(&err).to_json().unwrap();

    assert!(json.contains("\"code\": \"remote.command_failed\""));
    assert!(json.contains("some stdout"));
    assert!(json.contains("some stderr"));
    assert!(json.contains("\"exitCode\": 127"));
    assert!(json.contains("\"success\": false"));
}

#[test]
fn remote_command_failed_maps_to_exit_code_20() {
    let err = Error::remote_command_failed(RemoteCommandFailedDetails {
        command: "ls".to_string(),
        exit_code: 1,
        stdout: String::new(),
        stderr: String::new(),
        target: TargetDetails {
            host: None,
            user: None,
        },
    });

    let (_value, exit_code) = map_cmd_result_to_json::<serde_json::Value>(Err(err));

    assert_eq!(exit_code, 20);
}

#[test]
fn merge_conflict_carries_the_pull_request() {
    let err = Error::platform_merge_conflict(MergeConflictDetails {
        pr_id: 42,
        version: Some(3),
        message: "pull request is out of date".to_string(),
    });

    let json = CliResponse::<()>::from_error(&err).to_json().unwrap();

    assert!(json.contains("\"code\": \"platform.merge_conflict\""));
    assert!(json.contains("\"prId\": 42"));
}

#[test]
fn unregistered_module_maps_to_exit_code_4() {
    let err = Error::module_not_registered(ModuleNotRegisteredDetails {
        module: "etl".to_string(),
        registry: "MDS.MODULY".to_string(),
        log: None,
    });

    let (_value, exit_code) = map_cmd_result_to_json::<serde_json::Value>(Err(err));

    assert_eq!(exit_code, 4);
}

#[test]
fn failed_run_keeps_its_data_but_is_not_successful() {
    let json = CliResponse::with_exit_code(serde_json::json!({ "state": "Failed" }), 20)
        .to_json()
        .unwrap();

    assert!(json.contains("\"success\": false"));
    assert!(json.contains("\"state\": \"Failed\""));
}

use chassis_tester::*;
use chassis_tester::protocol::*;

#[test]
fn test_safe_base_command() {
    let cmd = ControlCommand::safe_base();

    assert_eq!(cmd.gear_location, Gear::Neutral);
    assert!(cmd.parking_brake);
    assert_eq!(cmd.driving_mode, DrivingMode::CompleteAutoDrive);
    assert_eq!(cmd.throttle, 0.0);
    assert_eq!(cmd.brake, 0.0);
    assert_eq!(cmd.signal, VehicleSignal::default());
    assert!(!cmd.is_full_stop());
}

#[test]
fn test_full_stop_command() {
    let stop = ControlCommand::full_stop();

    assert!(stop.is_full_stop());
    assert_eq!(stop.brake, 100.0);
    assert_eq!(stop.gear_location, Gear::Neutral);
    assert!(stop.parking_brake);

    let reset = ControlCommand::safe_reset(50.0);
    assert_eq!(reset.brake, 50.0);
    assert!(!reset.is_full_stop());
}

#[test]
fn test_command_wire_names() {
    let mut cmd = ControlCommand::safe_base();
    cmd.gear_location = Gear::Drive;
    cmd.signal.turn_signal = TurnSignal::Left;

    let line = encode_command(&cmd).unwrap();
    let json: serde_json::Value = serde_json::from_str(&line).unwrap();

    assert_eq!(json["gear_location"], "GEAR_DRIVE");
    assert_eq!(json["driving_mode"], "COMPLETE_AUTO_DRIVE");
    assert_eq!(json["signal"]["turn_signal"], "TURN_LEFT");
    assert_eq!(json["header"]["sequence_num"], 0);
    assert!(!line.contains('\n'));
}

#[test]
fn test_decode_feedback_with_optional_fields_absent() {
    let line = r#"{
        "driving_mode": "COMPLETE_MANUAL",
        "gear_location": "GEAR_PARKING",
        "throttle_percentage": 0.0,
        "brake_percentage": 12.5,
        "steering_percentage": -3.0,
        "speed_mps": 0.0,
        "parking_brake": true
    }"#;

    let frame = decode_feedback(line).unwrap();
    assert_eq!(frame.gear_location, Gear::Park);
    assert_eq!(frame.brake_percentage, 12.5);
    assert_eq!(frame.instantaneous_acceleration, None);
    assert_eq!(frame.error_code, None);
    assert_eq!(frame.signal, VehicleSignal::default());
    assert!(!frame.error_reported());
}

#[test]
fn test_decode_feedback_error_code() {
    let line = r#"{"driving_mode":"COMPLETE_MANUAL","gear_location":"GEAR_NEUTRAL",
        "throttle_percentage":0,"brake_percentage":0,"steering_percentage":0,"speed_mps":0,
        "parking_brake":false,"error_code":"MANUAL_INTERVENTION"}"#;

    let frame = decode_feedback(line).unwrap();
    assert_eq!(frame.error_code, Some(ErrorCode::ManualIntervention));
    assert!(frame.error_reported());
    assert_eq!(ErrorCode::ManualIntervention.to_string(), "MANUAL_INTERVENTION");
}

#[test]
fn test_decode_rejects_malformed_frames() {
    assert_eq!(decode_feedback("not json"), Err(ProtocolError::InvalidJson));
    assert_eq!(decode_feedback(r#"{"speed_mps": 1.0}"#), Err(ProtocolError::InvalidJson));
    assert_eq!(
        decode_feedback(r#"{"driving_mode":"WARP_DRIVE","gear_location":"GEAR_NEUTRAL","throttle_percentage":0,"brake_percentage":0,"steering_percentage":0,"speed_mps":0,"parking_brake":false}"#),
        Err(ProtocolError::InvalidJson)
    );

    let oversized = format!("{{\"pad\":\"{}\"}}", "x".repeat(MAX_FRAME_SIZE));
    assert_eq!(decode_feedback(&oversized), Err(ProtocolError::MessageTooLarge));
}

#[test]
fn test_command_decodes_back() {
    let mut cmd = ControlCommand::safe_base();
    cmd.speed = 2.0;
    cmd.signal.horn = true;

    let decoded = decode_command(&encode_command(&cmd).unwrap()).unwrap();
    assert_eq!(decoded, cmd);
}

#[test]
fn test_gear_display() {
    assert_eq!(Gear::Drive.to_string(), "D");
    assert_eq!(Gear::Neutral.to_string(), "N");
    assert_eq!(Gear::Reverse.short_name(), "R");
    assert_eq!(Gear::Park.short_name(), "P");
}

use q13_core::{Basis, Q13Error};

#[test]
fn test_basis_wire_values() {
    assert_eq!(Basis::from_u8(0), Some(Basis::Z));
    assert_eq!(Basis::from_u8(1), Some(Basis::X));
    assert_eq!(Basis::from_u8(2), None);
    assert_eq!(Basis::X as u8, 1);
    assert_eq!(Basis::from_coin(true), Basis::X);
    assert_eq!(Basis::from_coin(false), Basis::Z);
}

#[test]
fn test_error_messages() {
    let e = Q13Error::InvalidPhase { expected: "idle", actual: "complete" };
    assert_eq!(e.to_string(), "session in phase complete (expected idle)");
    assert_eq!(Q13Error::InvalidMtu(20).to_string(), "mtu 20 leaves no room past the 20-byte header");
    assert_eq!(Q13Error::UnknownControl("ping".into()).to_string(), "unknown control type 'ping'");
}

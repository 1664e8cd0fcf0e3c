use tablekit_types::{PermissionAction, PermissionRule};

#[test]
fn renders_backend_string() {
    let rule = PermissionRule::new("any", PermissionAction::Read);
    assert_eq!(rule.to_backend_string(), r#"read("any")"#);
    assert_eq!(rule.to_string(), r#"read("any")"#);
}

#[test]
fn parses_backend_string() {
    let rule = PermissionRule::parse(r#"update("team:editors/owner")"#).unwrap();
    assert_eq!(rule.role, "team:editors/owner");
    assert_eq!(rule.action, PermissionAction::Update);
}

#[test]
fn parse_rejects_garbage() {
    assert!(PermissionRule::parse("read").is_err());
    assert!(PermissionRule::parse(r#"write("any")"#).is_err());
    assert!(PermissionRule::parse(r#"read("")"#).is_err());
}

#[test]
fn for_actions_expands_one_rule_per_action() {
    let rules = PermissionRule::for_actions("users", &[PermissionAction::Read, PermissionAction::Create]);
    assert_eq!(rules.len(), 2);
    assert!(rules.contains(&PermissionRule::new("users", PermissionAction::Create)));
}

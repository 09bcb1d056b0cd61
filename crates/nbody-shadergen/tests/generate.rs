use nbody_shadergen::{generate_variants, TemplateError};
use std::path::PathBuf;

fn temp_template(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("nbody-shadergen-{}-{name}", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_missing_template_yields_no_variants() {
    let result = generate_variants("/no/such/template.wgsl", 4);
    assert!(matches!(result, Err(TemplateError::Io { .. })));
}

#[test]
fn test_generate_from_file() {
    let path = temp_template(
        "kernel.wgsl",
        "@compute @workgroup_size(/*SIZE*/)\nfn main() {\n\t/*REPEAT(touch(#ID#);)*/\n}\n",
    );
    let variants = generate_variants(&path, 3).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(variants.len(), 3);
    assert!(variants[2].starts_with("@compute @workgroup_size(4)\n"));
    assert_eq!(variants[2].matches("\ttouch(").count(), 4);
    assert!(variants[2].contains("\ttouch(3);\n"));
    assert!(!variants[1].contains("touch(2)"));
}

#[test]
fn test_malformed_template_yields_no_variants() {
    let path = temp_template("broken.wgsl", "/*REPEAT(never closes\n");
    let result = generate_variants(&path, 2);
    std::fs::remove_file(&path).ok();
    assert!(matches!(result, Err(TemplateError::Unbalanced { line: 1 })));
}

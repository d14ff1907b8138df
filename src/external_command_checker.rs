use bird_tool_utils::external_command_checker::*;

pub fn check_for_dependencies() {
    check_for_fastani();
}

pub fn check_for_fastani() {
    self::check_for_external_command_presence("fastANI", "which fastANI");
    self::default_version_check("fastANI", "1.3", false, None);
}

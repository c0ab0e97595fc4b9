//! Topic layout of one bridged device.
//!
//! ```text
//! <base>/cmnd/<device>/<command>       inbound commands
//! <base>/response/<device>/<command>   command results
//! <base>/error/disconnected/<device>   instrument I/O failures
//! <base>/error/command/<device>        rejected command parameters
//! <base>/connected/<device>            retained link status ("1" / "0")
//! ```

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
    device: String,
    command_prefix: String,
}

impl Topics {
    pub fn new(base: impl Into<String>, device: impl Into<String>) -> Self {
        let base = base.into();
        let device = device.into();
        let command_prefix = format!("{base}/cmnd/{device}/");
        Self {
            base,
            device,
            command_prefix,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Wildcard filter covering every command of this device.
    pub fn command_filter(&self) -> String {
        format!("{}#", self.command_prefix)
    }

    #[cfg(test)]
    pub fn command(&self, command: &str) -> String {
        format!("{}{command}", self.command_prefix)
    }

    pub fn response(&self, command: &str) -> String {
        format!("{}/response/{}/{command}", self.base, self.device)
    }

    pub fn disconnected_error(&self) -> String {
        format!("{}/error/disconnected/{}", self.base, self.device)
    }

    pub fn command_error(&self) -> String {
        format!("{}/error/command/{}", self.base, self.device)
    }

    pub fn connected(&self) -> String {
        format!("{}/connected/{}", self.base, self.device)
    }

    /// Extracts the command name from `<base>/cmnd/<device>/<command>`.
    ///
    /// Returns `None` for foreign topics and for anything that is not
    /// exactly one non-empty level below the device.
    pub fn parse_command<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let name = topic.strip_prefix(self.command_prefix.as_str())?;
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics::new("lab/floor2", "keithley")
    }

    #[test]
    fn builds_outbound_topics() {
        let t = topics();
        assert_eq!(t.command_filter(), "lab/floor2/cmnd/keithley/#");
        assert_eq!(t.response("current"), "lab/floor2/response/keithley/current");
        assert_eq!(
            t.disconnected_error(),
            "lab/floor2/error/disconnected/keithley"
        );
        assert_eq!(t.command_error(), "lab/floor2/error/command/keithley");
        assert_eq!(t.connected(), "lab/floor2/connected/keithley");
    }

    #[test]
    fn parses_command_topics() {
        let t = topics();
        assert_eq!(
            t.parse_command("lab/floor2/cmnd/keithley/source_voltage"),
            Some("source_voltage")
        );
        assert_eq!(t.parse_command(&t.command("reset")), Some("reset"));
    }

    #[test]
    fn rejects_foreign_and_nested_topics() {
        let t = topics();
        assert_eq!(t.parse_command("lab/floor2/cmnd/other/current"), None);
        assert_eq!(t.parse_command("lab/cmnd/keithley/current"), None);
        assert_eq!(t.parse_command("lab/floor2/cmnd/keithley/"), None);
        assert_eq!(t.parse_command("lab/floor2/cmnd/keithley/a/b"), None);
        assert_eq!(
            t.parse_command("lab/floor2/response/keithley/current"),
            None
        );
    }
}

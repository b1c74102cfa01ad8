#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanCommand {
    Start,
    Stop,
}

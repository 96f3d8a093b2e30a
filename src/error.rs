use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    Config(String),
    Data(String),
    Mesh(String),
    Simulator(String),
    Log(String),
    Optimizer(String),
}

impl Display for CalibrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (err_name, value) = match self {
            CalibrationError::Config(v) => ("Config", v),
            CalibrationError::Data(v) => ("Data", v),
            CalibrationError::Mesh(v) => ("Mesh", v),
            CalibrationError::Simulator(v) => ("Simulator", v),
            CalibrationError::Log(v) => ("Evaluation log", v),
            CalibrationError::Optimizer(v) => ("Optimizer", v),
        };

        write!(f, "{} error: {}", err_name, value)
    }
}

impl std::error::Error for CalibrationError {}

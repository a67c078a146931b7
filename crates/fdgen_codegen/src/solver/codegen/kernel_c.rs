use super::c_ast::Module;

/// Rendered-on-demand C99 translation unit of one kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSource {
    name: String,
    module: Module,
}

impl KernelSource {
    pub fn new(name: impl Into<String>, module: Module) -> Self {
        Self {
            name: name.into(),
            module,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn file_name(&self) -> String {
        format!("{}.c", self.name)
    }

    pub fn to_c(&self) -> String {
        self.module.to_c()
    }
}

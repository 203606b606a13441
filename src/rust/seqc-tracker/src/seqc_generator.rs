// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use crate::Result;
use crate::seqc_statements::{PlaybackWaves, SeqCStatement, SeqCVariant};
use anyhow::anyhow;

type VariableInternal = String;

fn format_comment(comment: &Option<String>) -> String {
    if let Some(comment) = comment {
        if !comment.is_empty() {
            return format!("  // {comment}");
        }
    }
    String::new()
}

fn indent(s: &str, prefix: &str) -> String {
    s.lines()
        .flat_map(|line| [prefix, line, "\n"].into_iter())
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeqCGenerator {
    statements: Vec<SeqCStatement>,
    symbols: HashSet<VariableInternal>,
}

impl SeqCGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_statements_from(&mut self, other: SeqCGenerator) {
        self.statements.extend(other.statements);
    }

    pub fn add_comment<S: Into<String>>(&mut self, comment: S) {
        self.statements.push(SeqCStatement::Comment {
            text: comment.into(),
        });
    }

    pub fn add_function_call_statement<S1: Into<String>, S2: Into<String>>(
        &mut self,
        name: S1,
        args: Vec<SeqCVariant>,
        assign_to: Option<S2>,
    ) {
        self.statements.push(SeqCStatement::FunctionCall {
            name: name.into(),
            args,
            assign_to: assign_to.map(|s| s.into()),
        });
    }

    pub fn add_constant_definition<S1: Into<String>, S2: Into<String>>(
        &mut self,
        name: S1,
        value: SeqCVariant,
        comment: Option<S2>,
    ) {
        self.statements.push(SeqCStatement::Constant {
            name: name.into(),
            value,
            comment: comment.map(|s| s.into()),
        });
    }

    pub fn add_set_wave_dio(&mut self, codeword: u32, waves: PlaybackWaves) {
        self.statements
            .push(SeqCStatement::SetWaveDio { codeword, waves });
    }

    pub fn add_prefetch(&mut self, waves: PlaybackWaves) {
        self.statements.push(SeqCStatement::Prefetch { waves });
    }

    pub fn add_play_wave_statement(&mut self, waves: PlaybackWaves) {
        self.statements.push(SeqCStatement::PlayWave { waves });
    }

    pub fn add_play_wave_dio_statement(&mut self) {
        self.statements.push(SeqCStatement::PlayWaveDio);
    }

    pub fn add_repeat(&mut self, count: SeqCVariant, body: SeqCGenerator) {
        let complexity = body.estimate_complexity() + 2; // penalty for loop overhead
        self.statements.push(SeqCStatement::Repeat {
            count,
            body,
            complexity,
        });
    }

    pub fn add_while_true(&mut self, body: SeqCGenerator) {
        let complexity = body.estimate_complexity() + 2; // penalty for loop overhead
        self.statements
            .push(SeqCStatement::WhileTrue { body, complexity });
    }

    pub fn add_if<S: Into<String>>(
        &mut self,
        conditions: Vec<S>,
        mut bodies: Vec<SeqCGenerator>,
    ) -> Result<()> {
        if conditions.is_empty()
            || (conditions.len() != bodies.len() && bodies.len() != conditions.len() + 1)
        {
            return Err(anyhow!(
                "Number of conditions {} and bodies {} do not match",
                conditions.len(),
                bodies.len()
            )
            .into());
        }
        let conditions = conditions
            .into_iter()
            .map(|s| s.into())
            .collect::<Vec<String>>();
        if conditions.iter().any(|c| c.is_empty()) {
            return Err(anyhow!("Condition may not be empty").into());
        }

        let mut complexity = 0;
        for body in &bodies {
            complexity += body.estimate_complexity() + 1;
        }
        let has_else = bodies.len() > conditions.len();
        let else_body = if has_else { bodies.pop() } else { None };
        self.statements.push(SeqCStatement::If {
            conditions,
            bodies,
            else_body,
            complexity,
        });
        Ok(())
    }

    // only valid while the generator maps to a single scope
    pub fn add_variable_declaration<S: Into<String>>(
        &mut self,
        variable_name: S,
        initial_value: Option<SeqCVariant>,
    ) -> Result<()> {
        let variable_name: String = variable_name.into();
        if self.symbols.contains(&variable_name) {
            return Err(anyhow!(
                "Trying to declare variable {variable_name} which has already been declared in this scope"
            )
            .into());
        }
        self.symbols.insert(variable_name.clone());
        self.statements.push(SeqCStatement::VariableDeclaration {
            variable_name,
            initial_value,
        });
        Ok(())
    }

    pub fn add_variable_assignment<S: Into<String>>(
        &mut self,
        variable_name: S,
        value: SeqCVariant,
    ) {
        self.statements.push(SeqCStatement::VariableAssignment {
            variable_name: variable_name.into(),
            value,
        });
    }

    /// Calculate a rough estimate for the complexity (~nr of instructions)
    ///
    /// The point here is not to be accurate about every statement, but to correctly
    /// gauge the size of loops etc.
    pub fn estimate_complexity(&self) -> u64 {
        self.statements.iter().map(SeqCStatement::complexity).sum()
    }

    pub fn generate_seq_c(&self) -> String {
        self.statements
            .iter()
            .map(|statement| self.emit_statement(statement))
            .collect::<String>()
    }

    fn emit_statement(&self, statement: &SeqCStatement) -> String {
        match statement {
            SeqCStatement::Comment { text } => format!("// {text}\n"),
            SeqCStatement::FunctionCall {
                name,
                args,
                assign_to,
            } => {
                let assign_to = assign_to
                    .as_ref()
                    .map(|s| format!("{s} = "))
                    .unwrap_or_default();
                let args = args
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<String>>()
                    .join(", ");

                format!("{assign_to}{name}({args});\n")
            }
            SeqCStatement::Constant {
                name,
                value,
                comment,
            } => {
                format!("const {} = {};{}\n", name, value, format_comment(comment))
            }
            SeqCStatement::VariableDeclaration {
                variable_name,
                initial_value,
            } => {
                let initial_value = initial_value
                    .as_ref()
                    .map(|s| format!(" = {s}"))
                    .unwrap_or_default();
                format!("var {variable_name}{initial_value};\n")
            }
            SeqCStatement::VariableAssignment {
                variable_name,
                value,
            } => format!("{variable_name} = {value};\n"),
            SeqCStatement::SetWaveDio { codeword, waves } => {
                format!("setWaveDIO({codeword}, {});\n", waves.channel_args())
            }
            SeqCStatement::Prefetch { waves } => format!("prefetch({});\n", waves.wave_args()),
            SeqCStatement::PlayWave { waves } => {
                format!("playWave({});\n", waves.channel_args())
            }
            SeqCStatement::PlayWaveDio => "playWaveDIO();\n".to_string(),
            SeqCStatement::Repeat { count, body, .. } => {
                let body = indent(&body.generate_seq_c(), "  ");
                format!("repeat ({count}) {{\n{body}}}\n")
            }
            SeqCStatement::WhileTrue { body, .. } => {
                let body = indent(&body.generate_seq_c(), "  ");
                format!("while(1) {{\n{body}}}\n")
            }
            SeqCStatement::If {
                conditions,
                bodies,
                else_body,
                ..
            } => {
                let mut text = String::new();
                for (i, (condition, body)) in conditions.iter().zip(bodies).enumerate() {
                    let body = indent(&body.generate_seq_c(), "  ");
                    if i == 0 {
                        text += &format!("if ({condition}) {{\n{body}}}");
                    } else {
                        text += &format!(" else if ({condition}) {{\n{body}}}");
                    }
                }
                if let Some(else_body) = else_body {
                    let body = indent(&else_body.generate_seq_c(), "  ");
                    text += &format!(" else {{\n{body}}}");
                }
                text + "\n"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seqc_statements::WaveExpr;

    #[test]
    fn test_repeat_and_loop() {
        let mut body = SeqCGenerator::new();
        body.add_function_call_statement(
            "waitDigTrigger",
            vec![SeqCVariant::Integer(1)],
            None::<String>,
        );
        body.add_play_wave_statement(PlaybackWaves::First(WaveExpr::new("w", false)));
        let mut repeated = SeqCGenerator::new();
        repeated.add_repeat(SeqCVariant::Integer(3), body);
        let mut seqc = SeqCGenerator::new();
        seqc.add_while_true(repeated);
        assert_eq!(
            seqc.generate_seq_c(),
            "while(1) {\n  repeat (3) {\n    waitDigTrigger(1);\n    playWave(1, \"w\");\n  }\n}\n"
        );
        assert_eq!(seqc.estimate_complexity(), 6);
    }

    #[test]
    fn test_if_else() {
        let mut then_body = SeqCGenerator::new();
        then_body.add_variable_assignment("RO_TRIG", SeqCVariant::String("IAVG_TRIG".into()));
        let mut else_body = SeqCGenerator::new();
        else_body.add_variable_assignment("RO_TRIG", SeqCVariant::String("WINT_TRIG".into()));
        let mut seqc = SeqCGenerator::new();
        seqc.add_if(vec!["getUserReg(1)"], vec![then_body, else_body])
            .unwrap();
        assert_eq!(
            seqc.generate_seq_c(),
            "if (getUserReg(1)) {\n  RO_TRIG = IAVG_TRIG;\n} else {\n  RO_TRIG = WINT_TRIG;\n}\n"
        );
        assert!(
            seqc.add_if(Vec::<String>::new(), vec![SeqCGenerator::new()])
                .is_err()
        );
    }

    #[test]
    fn test_variable_declared_once() {
        let mut seqc = SeqCGenerator::new();
        seqc.add_variable_declaration("loop_cnt", Some(SeqCVariant::String("getUserReg(0)".into())))
            .unwrap();
        assert!(seqc.add_variable_declaration("loop_cnt", None).is_err());
        assert_eq!(seqc.generate_seq_c(), "var loop_cnt = getUserReg(0);\n");
    }

    #[test]
    fn test_codeword_statements() {
        let mut seqc = SeqCGenerator::new();
        seqc.add_set_wave_dio(
            5,
            PlaybackWaves::Both(WaveExpr::new("a", true), WaveExpr::new("b", false)),
        );
        seqc.add_comment("dispatch");
        seqc.add_play_wave_dio_statement();
        assert_eq!(
            seqc.generate_seq_c(),
            "setWaveDIO(5, \"a\" + \"a_m\", \"b\");\n// dispatch\nplayWaveDIO();\n"
        );
        assert_eq!(seqc.estimate_complexity(), 2);
    }
}

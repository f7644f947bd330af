use malachite::num::arithmetic::traits::{Abs, Lcm};
use malachite::num::basic::traits::{One, Zero};
use malachite::{Natural, Rational};
use mendeleev::{Element, ALL_ELEMENTS};
use std::iter::zip;
use thiserror::Error;



/// Maximum number of compounds (matrix columns) an equation may have.
/// Equations with more compounds are rejected as too complex.
/// This is a deliberate scope limit, not a numerical one, and can be raised freely.
pub const MAX_COMPOUNDS: usize = 6;



/// Errors that can occur while balancing an equation
#[derive(Clone, Debug, Eq, Hash, PartialEq, Error)]
pub enum BalanceError {
    /// The equation has no separator, or one of its sides is empty
    #[error("Invalid equation format. Use '->' or '=' to separate reactants and products.")]
    InvalidFormat,
    /// A formula contains a character where no element token can start
    #[error("unexpected character '{ch}' at position {pos} in formula '{formula}'")]
    UnexpectedChar {
        /// The (expanded) formula text that was being scanned
        formula: String,
        /// Character index of the offending character
        pos: usize,
        /// The offending character
        ch: char,
    },
    /// A token looks like an element symbol but names no real element
    #[error("unrecognized element symbol '{symbol}' in formula '{formula}'")]
    UnknownElement {
        /// The (expanded) formula text that was being scanned
        formula: String,
        /// The symbol that failed the periodic table lookup
        symbol: String,
    },
    /// The equation has more than [`MAX_COMPOUNDS`] compounds
    #[error("Could not balance. Check if the equation is valid.")]
    TooManyCompounds,
    /// No positive integer solution exists for the equation
    #[error("Could not balance. Check if the equation is valid.")]
    Unbalanced,
}

/// Result of a balancing attempt
pub type BalanceResult = Result<BalancedEquation, BalanceError>;

/// A successfully balanced equation
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BalancedEquation {
    /// The balanced equation string, e.g. "2H2 + O2 -> 2H2O"
    pub balanced: String,
    /// Stoichiometric coefficients, one per compound, reactants then products
    pub coefficients: Vec<i64>,
    /// Compound formulas in input order, reactants then products
    pub compounds: Vec<String>,
}

/// Balances a chemical equation given as a string
/// The two sides must be separated by "->" or "=", compounds by "+"
/// # Arguments
/// * `input` - equation string, e.g. "H2 + O2 -> H2O"
/// # Returns
/// * `Ok` - the balanced equation with its coefficients
/// * `Err` - error describing why the equation could not be balanced
/// # Example
/// ```
/// use chembal::balance;
///
/// let result = balance("H2 + O2 -> H2O").unwrap();
///
/// assert_eq!(result.balanced, "2H2 + O2 -> 2H2O");
/// assert_eq!(result.coefficients, vec![2, 1, 2]);
/// assert_eq!(result.compounds, vec!["H2", "O2", "H2O"]);
/// ```
pub fn balance(input: &str) -> BalanceResult {
    let mut equation = Equation::parse(input)?;
    equation.solve()?;

    let compounds = equation
        .reactants
        .iter()
        .chain(equation.products.iter())
        .map(|compound| compound.formula().to_string())
        .collect();

    match (equation.balanced_str(), equation.coefficients) {
        (Some(balanced), Some(coefficients)) => Ok(BalancedEquation {
            balanced,
            coefficients,
            compounds,
        }),
        _ => Err(BalanceError::Unbalanced),
    }
}



/// A struct that represents a chemical equation (e.g. 2H2 + O2 -> 2H2O)
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Equation {
    /// String from which the equation was parsed
    original_str: String,
    /// A vector of reactants
    reactants: Vec<Compound>,
    /// A vector of products
    products: Vec<Compound>,
    /// Solved stoichiometric coefficients, one per compound, reactants then products
    coefficients: Option<Vec<i64>>,
}
impl Equation {
    /// Create a new equation from a plain text string
    /// The sides are separated by "->" or "=" (whichever appears first in the string),
    /// compounds within a side by "+"
    /// # Arguments
    /// * `input` - equation string
    /// # Returns
    /// * `Ok` - equation
    /// * `Err` - error that occurred during parsing
    /// # Example
    /// ```
    /// use chembal::{Compound, Equation};
    ///
    /// let equation = Equation::parse("H2 + O2 -> H2O").unwrap();
    ///
    /// let expected_reactants = vec![
    ///     Compound::from_formula("H2").unwrap(),
    ///     Compound::from_formula("O2").unwrap(),
    /// ];
    /// let expected_products = vec![Compound::from_formula("H2O").unwrap()];
    ///
    /// assert_eq!(equation.reactants(), &expected_reactants[..]);
    /// assert_eq!(equation.products(), &expected_products[..]);
    /// ```
    pub fn parse(input: &str) -> Result<Self, BalanceError> {
        let (reactant_strs, product_strs) = split_equation(input)?;

        let reactants = reactant_strs
            .iter()
            .map(|formula| Compound::from_formula(formula))
            .collect::<Result<Vec<_>, _>>()?;
        let products = product_strs
            .iter()
            .map(|formula| Compound::from_formula(formula))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            original_str: input.to_string(),
            reactants,
            products,
            coefficients: None,
        })
    }

    /// Solves the equation, storing the smallest positive integer coefficients
    /// # Returns
    /// * `Ok` - if the equation was balanced successfully
    /// * `Err` - if the equation has too many compounds or no solution
    /// # Example
    /// ```
    /// use chembal::Equation;
    ///
    /// let mut equation = Equation::parse("CH4 + O2 -> CO2 + H2O").unwrap();
    /// equation.solve().unwrap();
    ///
    /// assert_eq!(equation.coefficients(), Some(&[1, 2, 1, 2][..]));
    /// ```
    pub fn solve(&mut self) -> Result<(), BalanceError> {
        if self.reactants.len() + self.products.len() > MAX_COMPOUNDS {
            return Err(BalanceError::TooManyCompounds);
        }

        let matrix = build_matrix(&self.reactants, &self.products);
        let coefficients = solve_homogeneous(&matrix).ok_or(BalanceError::Unbalanced)?;

        self.coefficients = Some(coefficients);
        Ok(())
    }

    /// Returns the original string from which the equation was parsed
    pub fn original_str(&self) -> &str {
        &self.original_str
    }

    /// Returns the reactant compounds
    pub fn reactants(&self) -> &[Compound] {
        &self.reactants
    }

    /// Returns the product compounds
    pub fn products(&self) -> &[Compound] {
        &self.products
    }

    /// Returns the solved coefficients, one per compound, reactants then products
    /// `None` until [`Equation::solve`] has succeeded
    pub fn coefficients(&self) -> Option<&[i64]> {
        self.coefficients.as_deref()
    }

    /// Returns the balanced equation as a string
    /// Coefficients equal to 1 are not written, the sides are joined by " -> "
    /// regardless of which separator the input used
    /// # Returns
    /// * `Option<String>` - balanced equation, `None` until [`Equation::solve`] has succeeded
    /// # Example
    /// ```
    /// use chembal::Equation;
    ///
    /// let mut equation = Equation::parse("Al + Fe2O3 = Fe + Al2O3").unwrap();
    /// equation.solve().unwrap();
    ///
    /// assert_eq!(equation.balanced_str().unwrap(), "2Al + Fe2O3 -> 2Fe + Al2O3");
    /// ```
    pub fn balanced_str(&self) -> Option<String> {
        let coefficients = self.coefficients.as_ref()?;
        let (reactant_coeffs, product_coeffs) = coefficients.split_at(self.reactants.len());

        let mut reactants_str = String::new();
        for (i, (compound, quantity)) in zip(self.reactants.iter(), reactant_coeffs.iter()).enumerate() {
            if i != 0 {
                reactants_str.push_str(" + ");
            }
            if *quantity != 1 {
                reactants_str.push_str(&quantity.to_string());
            }
            reactants_str.push_str(compound.formula());
        }

        let mut products_str = String::new();
        for (i, (compound, quantity)) in zip(self.products.iter(), product_coeffs.iter()).enumerate() {
            if i != 0 {
                products_str.push_str(" + ");
            }
            if *quantity != 1 {
                products_str.push_str(&quantity.to_string());
            }
            products_str.push_str(compound.formula());
        }

        Some(format!("{} -> {}", reactants_str, products_str))
    }
}

/// Splits an equation string into trimmed reactant and product formula strings.
/// The earliest occurrence of "->" or "=" separates the sides; only that first
/// match is used, so any further separator ends up inside a formula and fails
/// parsing there.
fn split_equation(input: &str) -> Result<(Vec<&str>, Vec<&str>), BalanceError> {
    let (pos, len) = match (input.find("->"), input.find('=')) {
        (Some(arrow), Some(equals)) if equals < arrow => (equals, 1),
        (Some(arrow), _) => (arrow, 2),
        (None, Some(equals)) => (equals, 1),
        (None, None) => return Err(BalanceError::InvalidFormat),
    };

    let reactants = side_formulas(&input[..pos])?;
    let products = side_formulas(&input[pos + len..])?;
    Ok((reactants, products))
}

/// Splits one side of an equation on '+' and trims the pieces.
/// An empty side or an empty piece is an invalid format.
fn side_formulas(side: &str) -> Result<Vec<&str>, BalanceError> {
    let formulas: Vec<&str> = side.split('+').map(str::trim).collect();
    if formulas.iter().any(|formula| formula.is_empty()) {
        return Err(BalanceError::InvalidFormat);
    }
    Ok(formulas)
}



/// A struct that represents a chemical compound (e.g. H2O, NaCl, Ca(OH)2)
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Compound {
    /// String from which the compound was parsed
    formula: String,
    /// Elements and their atom counts, in order of first appearance in the formula
    composition: Vec<(Element, i64)>,
}
impl Compound {
    /// Create a new compound from a formula string
    /// Parenthesized groups with a trailing multiplier are expanded first,
    /// then element tokens (an uppercase letter plus optional lowercase letters,
    /// followed by an optional count) are matched against the periodic table
    /// # Arguments
    /// * `formula` - formula string, e.g. "Ca(OH)2"
    /// # Returns
    /// * `Ok` - compound
    /// * `Err` - error that occurred during parsing
    /// # Example
    /// ```
    /// use chembal::Compound;
    /// use mendeleev::Element;
    ///
    /// let compound = Compound::from_formula("Ca(OH)2").unwrap();
    ///
    /// assert_eq!(compound.formula(), "Ca(OH)2");
    /// assert_eq!(
    ///     compound.composition(),
    ///     &[(Element::Ca, 1), (Element::O, 2), (Element::H, 2)][..],
    /// );
    /// ```
    pub fn from_formula(formula: &str) -> Result<Self, BalanceError> {
        let expanded = expand_formula(formula);
        let chars: Vec<char> = expanded.chars().collect();

        let mut composition: Vec<(Element, i64)> = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            if !chars[i].is_ascii_uppercase() {
                return Err(BalanceError::UnexpectedChar {
                    formula: expanded,
                    pos: i,
                    ch: chars[i],
                });
            }

            // element symbol: one uppercase letter plus any following lowercase letters
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_lowercase() {
                i += 1;
            }
            let symbol: String = chars[start..i].iter().collect();
            let element = match ALL_ELEMENTS.iter().find(|e| e.symbol() == symbol) {
                Some(element) => *element,
                None => return Err(BalanceError::UnknownElement { formula: expanded, symbol }),
            };

            // optional count, implicit 1 when absent
            let digits_start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let count: i64 = if digits_start == i {
                1
            } else {
                let digits: String = chars[digits_start..i].iter().collect();
                digits.parse().map_err(|_| BalanceError::UnexpectedChar {
                    formula: expanded.clone(),
                    pos: digits_start,
                    ch: chars[digits_start],
                })?
            };

            // an explicit zero count contributes no entry
            if count == 0 {
                continue;
            }
            match composition.iter_mut().find(|(e, _)| *e == element) {
                Some((_, total)) => *total += count,
                None => composition.push((element, count)),
            }
        }

        Ok(Self {
            formula: formula.trim().to_string(),
            composition,
        })
    }

    /// Returns the original formula string
    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Returns the elements and their atom counts, in order of first appearance
    /// Every stored count is at least 1; absent elements have no entry
    pub fn composition(&self) -> &[(Element, i64)] {
        &self.composition
    }

    /// Returns the atom count of one element in the compound, 0 if absent
    pub fn count_of(&self, element: Element) -> i64 {
        self.composition
            .iter()
            .find(|(e, _)| *e == element)
            .map_or(0, |(_, count)| *count)
    }
}



/// Expands every parenthesized group carrying an explicit multiplier,
/// innermost first, until the formula is flat
/// Square brackets are accepted as parentheses
/// A group without a trailing multiplier is left in place and will fail parsing
/// later, as will any other malformed text, which passes through unchanged
/// # Arguments
/// * `formula` - formula string, possibly containing groups
/// # Returns
/// * `String` - equivalent formula with all multiplied groups written out flat
/// # Example
/// ```
/// use chembal::expand_formula;
///
/// assert_eq!(expand_formula("Ca(OH)2"), "CaO2H2");
/// assert_eq!(expand_formula("(NH4)2SO4"), "N2H8SO4");
/// assert_eq!(expand_formula("Al2[SO4]3"), "Al2S3O12");
///
/// // already flat formulas pass through untouched
/// assert_eq!(expand_formula("C6H12O6"), "C6H12O6");
/// ```
pub fn expand_formula(formula: &str) -> String {
    let mut formula: String = formula
        .chars()
        .map(|c| match c {
            '[' => '(',
            ']' => ')',
            other => other,
        })
        .collect();

    // each pass splices one innermost group, so nested groups resolve outward
    // and the number of '(' strictly decreases, which bounds the loop
    loop {
        let chars: Vec<char> = formula.chars().collect();
        match expand_once(&chars) {
            Some(next) => formula = next,
            None => break,
        }
    }
    formula
}

/// Rewrites the leftmost innermost group of shape `(<inner>)<digits>`,
/// returning `None` when no such group exists.
fn expand_once(formula: &[char]) -> Option<String> {
    for open in 0..formula.len() {
        if formula[open] != '(' {
            continue;
        }

        // the group is innermost only if its nonempty body contains no parentheses
        let mut close = open + 1;
        while close < formula.len() && formula[close] != '(' && formula[close] != ')' {
            close += 1;
        }
        if close == open + 1 || close == formula.len() || formula[close] == '(' {
            continue;
        }

        let mut end = close + 1;
        while end < formula.len() && formula[end].is_ascii_digit() {
            end += 1;
        }
        if end == close + 1 {
            continue; // no multiplier, the group stays as-is
        }
        let multiplier: i64 = match formula[close + 1..end].iter().collect::<String>().parse() {
            Ok(multiplier) => multiplier,
            Err(_) => continue,
        };

        let mut expanded: String = formula[..open].iter().collect();
        multiply_group(&formula[open + 1..close], multiplier, &mut expanded);
        expanded.extend(formula[end..].iter());
        return Some(expanded);
    }
    None
}

/// Writes the group body with every element count multiplied out explicitly.
/// Text that is not an element token is copied through verbatim and left to the parser.
fn multiply_group(group: &[char], multiplier: i64, out: &mut String) {
    let mut i = 0;
    while i < group.len() {
        if !group[i].is_ascii_uppercase() {
            out.push(group[i]);
            i += 1;
            continue;
        }

        let start = i;
        i += 1;
        while i < group.len() && group[i].is_ascii_lowercase() {
            i += 1;
        }
        let symbol_end = i;
        while i < group.len() && group[i].is_ascii_digit() {
            i += 1;
        }

        let count: i64 = if symbol_end == i {
            1
        } else {
            match group[symbol_end..i].iter().collect::<String>().parse() {
                Ok(count) => count,
                Err(_) => {
                    out.extend(group[start..i].iter());
                    continue;
                }
            }
        };

        out.extend(group[start..symbol_end].iter());
        out.push_str(&(count * multiplier).to_string());
    }
}



/// Builds the signed atom balance matrix for a set of compounds
/// One row per distinct element in order of first appearance (reactants scanned
/// first, in order, then products), one column per compound
/// Reactant entries are the element counts, product entries their negations,
/// so a valid coefficient vector zeroes every row
/// # Arguments
/// * `reactants` - reactant compounds, in input order
/// * `products` - product compounds, in input order
/// # Returns
/// * `Vec<Vec<i64>>` - the balance matrix
/// # Example
/// ```
/// use chembal::{build_matrix, Compound};
///
/// let reactants = vec![
///     Compound::from_formula("H2").unwrap(),
///     Compound::from_formula("O2").unwrap(),
/// ];
/// let products = vec![Compound::from_formula("H2O").unwrap()];
///
/// // rows: H and O, columns: H2, O2, H2O
/// assert_eq!(
///     build_matrix(&reactants, &products),
///     vec![vec![2, 0, -2], vec![0, 2, -1]],
/// );
/// ```
pub fn build_matrix(reactants: &[Compound], products: &[Compound]) -> Vec<Vec<i64>> {
    // explicit element list, so row order is the order of first appearance
    let mut elements: Vec<Element> = Vec::new();
    for compound in reactants.iter().chain(products.iter()) {
        for &(element, _) in compound.composition() {
            if !elements.contains(&element) {
                elements.push(element);
            }
        }
    }

    let mut matrix = Vec::with_capacity(elements.len());
    for &element in &elements {
        let mut row = Vec::with_capacity(reactants.len() + products.len());
        for compound in reactants {
            row.push(compound.count_of(element));
        }
        for compound in products {
            row.push(-compound.count_of(element));
        }
        matrix.push(row);
    }
    matrix
}

/// Finds the smallest strictly positive integer vector `x` with `matrix * x = 0`
/// The matrix is augmented with a row pinning the last unknown to 1, solved by
/// Gaussian elimination over exact rationals, and the rational solution is scaled
/// by the least common multiple of its denominators, then reduced to lowest terms
/// # Arguments
/// * `matrix` - the signed balance matrix, one row per element, one column per compound
/// # Returns
/// * `Some` - the minimal positive integer solution
/// * `None` - the system is inconsistent, underdetermined, or has no positive solution
/// # Example
/// ```
/// use chembal::solve_homogeneous;
///
/// // H2 + O2 -> H2O gives rows H: [2, 0, -2] and O: [0, 2, -1]
/// let matrix = vec![vec![2, 0, -2], vec![0, 2, -1]];
///
/// assert_eq!(solve_homogeneous(&matrix), Some(vec![2, 1, 2]));
/// ```
pub fn solve_homogeneous(matrix: &[Vec<i64>]) -> Option<Vec<i64>> {
    let rows = matrix.len();
    if rows == 0 {
        return None;
    }
    let n = matrix[0].len();
    if n == 0 || matrix.iter().any(|row| row.len() != n) {
        return None;
    }

    // augmented matrix: zero right-hand side, plus one row pinning the last
    // unknown to 1 to pick a single vector out of the null space
    let mut aug: Vec<Vec<Rational>> = matrix
        .iter()
        .map(|row| {
            row.iter()
                .map(|&x| Rational::from(x))
                .chain([Rational::ZERO])
                .collect()
        })
        .collect();
    let mut pin = vec![Rational::ZERO; n + 1];
    pin[n - 1] = Rational::ONE;
    pin[n] = Rational::ONE;
    aug.push(pin);

    let mut m = rows + 1;
    // fewer equations than unknowns, the null space is not one-dimensional
    if m < n {
        return None;
    }

    gaussian_elimination(&mut aug, m, n);

    // a zero column means that compound constrains nothing
    for col in 0..n {
        if aug.iter().all(|row| row[col] == Rational::ZERO) {
            return None;
        }
    }

    // surplus rows must have been reduced away, anything left over is a contradiction
    while m > n {
        if aug[m - 1].iter().any(|x| *x != Rational::ZERO) {
            return None;
        }
        aug.pop();
        m -= 1;
    }

    // rank deficiency inside the square part
    for i in 0..n {
        if aug[i][i] == Rational::ZERO {
            return None;
        }
    }

    back_substitute(&mut aug, n);

    let solutions: Vec<Rational> = aug.iter().map(|row| row[n].clone()).collect();

    // scale by the least common multiple of the denominators to get integers
    let mut lcm = Natural::ONE;
    for solution in &solutions {
        lcm = lcm.lcm(solution.denominator_ref());
    }
    let lcm = Rational::from(&lcm);

    let mut coefficients = Vec::with_capacity(n);
    for solution in &solutions {
        let scaled = solution * &lcm;
        coefficients.push(i64::try_from(&scaled).ok()?);
    }

    if coefficients.iter().any(|&c| c <= 0) {
        return None;
    }

    // reduce to lowest terms
    let common = coefficients.iter().fold(0, |acc, &c| gcd(acc, c));
    if common > 1 {
        for c in &mut coefficients {
            *c /= common;
        }
    }

    // verify conservation row by row before handing the solution out
    for row in matrix {
        if zip(row.iter(), coefficients.iter()).map(|(a, c)| a * c).sum::<i64>() != 0 {
            return None;
        }
    }

    Some(coefficients)
}

/// Performs Gaussian elimination on an augmented matrix (last column holds the
/// right-hand side), leaving it in row echelon form.
/// `m` is the number of rows, `n` the number of columns without the last one.
fn gaussian_elimination(matrix: &mut [Vec<Rational>], m: usize, n: usize) {
    let mut row = 0;
    let mut col = 0;
    while row < m && col < n {
        // partial pivoting, pick the row with the largest entry in this column
        let mut pivot = row;
        for (i, candidate) in matrix.iter().enumerate().skip(row + 1) {
            if (&candidate[col]).abs() > (&matrix[pivot][col]).abs() {
                pivot = i;
            }
        }

        if matrix[pivot][col] == Rational::ZERO {
            col += 1;
            continue;
        }
        matrix.swap(row, pivot);

        for i in (row + 1)..m {
            let factor = &matrix[i][col] / &matrix[row][col];
            matrix[i][col] = Rational::ZERO;
            for j in (col + 1)..=n {
                let scaled = &factor * &matrix[row][j];
                matrix[i][j] -= scaled;
            }
        }

        row += 1;
        col += 1;
    }
}

/// Reduces a square row echelon matrix (with nonzero diagonal) to reduced row
/// echelon form, after which the last column holds the solutions.
fn back_substitute(matrix: &mut [Vec<Rational>], n: usize) {
    for r in (1..n).rev() {
        for upper in 0..r {
            // only the cell above the leading coefficient and the result column
            // can still be nonzero, the rest were cleared bottom-up
            let factor = &matrix[upper][r] / &matrix[r][r];
            matrix[upper][r] = Rational::ZERO;
            let scaled = &factor * &matrix[r][n];
            matrix[upper][n] -= scaled;
        }
    }

    for (i, row) in matrix.iter_mut().enumerate() {
        let factor = Rational::ONE / &row[i];
        row[i] = Rational::ONE;
        row[n] *= factor;
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    /// Parses one side of a balanced equation ("2H2 + O2") into per-element
    /// atom totals, sorted by atomic number so both sides compare directly.
    fn side_totals(side: &str) -> Vec<(Element, i64)> {
        let mut totals: Vec<(Element, i64)> = Vec::new();
        for term in side.split('+') {
            let term = term.trim();
            let digits_end = term
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(term.len());
            let coefficient: i64 = if digits_end == 0 {
                1
            } else {
                term[..digits_end].parse().unwrap()
            };
            let compound = Compound::from_formula(&term[digits_end..]).unwrap();
            for &(element, count) in compound.composition() {
                match totals.iter_mut().find(|(e, _)| *e == element) {
                    Some((_, total)) => *total += count * coefficient,
                    None => totals.push((element, count * coefficient)),
                }
            }
        }
        totals.sort_by_key(|(element, _)| element.atomic_number());
        totals
    }

    #[test]
    fn balances_water_formation() {
        let result = balance("H2 + O2 -> H2O").unwrap();
        assert_eq!(result.balanced, "2H2 + O2 -> 2H2O");
        assert_eq!(result.coefficients, vec![2, 1, 2]);
        assert_eq!(result.compounds, vec!["H2", "O2", "H2O"]);
    }

    #[test]
    fn balances_methane_combustion() {
        let result = balance("CH4 + O2 -> CO2 + H2O").unwrap();
        assert_eq!(result.coefficients, vec![1, 2, 1, 2]);
        assert_eq!(result.balanced, "CH4 + 2O2 -> CO2 + 2H2O");
    }

    #[test]
    fn balances_thermite_reaction() {
        let result = balance("Al + Fe2O3 -> Fe + Al2O3").unwrap();
        assert_eq!(result.coefficients, vec![2, 1, 2, 1]);
        assert_eq!(result.balanced, "2Al + Fe2O3 -> 2Fe + Al2O3");
    }

    #[test]
    fn balances_with_equals_separator() {
        let result = balance("N2 + H2 = NH3").unwrap();
        assert_eq!(result.coefficients, vec![1, 3, 2]);
        // output always uses the arrow, whichever separator came in
        assert_eq!(result.balanced, "N2 + 3H2 -> 2NH3");
    }

    #[test]
    fn balances_already_balanced_equation() {
        let result = balance("H2O = H2O").unwrap();
        assert_eq!(result.coefficients, vec![1, 1]);
        assert_eq!(result.balanced, "H2O -> H2O");
    }

    #[test]
    fn balances_parenthesized_compounds() {
        let result = balance("Ca(OH)2 + HCl -> CaCl2 + H2O").unwrap();
        assert_eq!(result.coefficients, vec![1, 2, 1, 2]);
        assert_eq!(result.balanced, "Ca(OH)2 + 2HCl -> CaCl2 + 2H2O");
    }

    #[test]
    fn conservation_holds_after_reparsing_output() {
        let inputs = [
            "H2 + O2 -> H2O",
            "CH4 + O2 -> CO2 + H2O",
            "Al + Fe2O3 -> Fe + Al2O3",
            "Ca(OH)2 + HCl -> CaCl2 + H2O",
            "N2 + H2 = NH3",
        ];
        for input in inputs {
            let result = balance(input).unwrap();
            let (left, right) = result.balanced.split_once(" -> ").unwrap();
            assert_eq!(side_totals(left), side_totals(right), "input: {input}");
        }
    }

    #[test]
    fn coefficients_are_positive_and_reduced() {
        let inputs = [
            "H2 + O2 -> H2O",
            "CH4 + O2 -> CO2 + H2O",
            "Al + Fe2O3 -> Fe + Al2O3",
            "H2O -> H2O",
        ];
        for input in inputs {
            let result = balance(input).unwrap();
            assert!(result.coefficients.iter().all(|&c| c > 0), "input: {input}");
            let common = result.coefficients.iter().fold(0, |acc, &c| gcd(acc, c));
            assert_eq!(common, 1, "input: {input}");
        }
    }

    #[test]
    fn missing_separator_is_a_format_error() {
        let err = balance("not an equation").unwrap_err();
        assert_eq!(err, BalanceError::InvalidFormat);
        assert_eq!(
            err.to_string(),
            "Invalid equation format. Use '->' or '=' to separate reactants and products.",
        );
    }

    #[test]
    fn empty_side_is_a_format_error() {
        assert_eq!(balance("-> H2O").unwrap_err(), BalanceError::InvalidFormat);
        assert_eq!(balance("H2 + O2 ->").unwrap_err(), BalanceError::InvalidFormat);
    }

    #[test]
    fn empty_compound_is_a_format_error() {
        assert_eq!(balance("H2 + -> H2O").unwrap_err(), BalanceError::InvalidFormat);
    }

    #[test]
    fn unknown_element_symbol_is_a_parse_error() {
        assert!(matches!(
            balance("Xx2 -> Xx2").unwrap_err(),
            BalanceError::UnknownElement { symbol, .. } if symbol == "Xx",
        ));
    }

    #[test]
    fn lowercase_leading_token_is_a_parse_error() {
        assert!(matches!(
            balance("h2 + O2 -> H2O").unwrap_err(),
            BalanceError::UnexpectedChar { ch: 'h', pos: 0, .. },
        ));
    }

    #[test]
    fn leading_digits_are_a_parse_error() {
        // input coefficients are not accepted, only bare formulas
        assert!(matches!(
            balance("2H2 + O2 -> 2H2O").unwrap_err(),
            BalanceError::UnexpectedChar { ch: '2', pos: 0, .. },
        ));
    }

    #[test]
    fn second_separator_lands_in_a_formula() {
        // only the first separator splits the sides, the rest fails parsing
        assert!(matches!(
            balance("H2 + O2 -> H2O = H2O").unwrap_err(),
            BalanceError::UnexpectedChar { .. },
        ));
    }

    #[test]
    fn unbalanceable_equation_is_rejected() {
        let err = balance("H2 -> O2").unwrap_err();
        assert_eq!(err, BalanceError::Unbalanced);
        assert_eq!(err.to_string(), "Could not balance. Check if the equation is valid.");
    }

    #[test]
    fn too_many_compounds_are_rejected() {
        let err = balance("H2O + H2O + H2O + H2O + H2O + H2O + H2O -> H2O").unwrap_err();
        assert_eq!(err, BalanceError::TooManyCompounds);
        assert_eq!(err.to_string(), "Could not balance. Check if the equation is valid.");
    }

    #[test]
    fn underdetermined_system_is_rejected() {
        // two independent reactions folded into one equation
        assert_eq!(balance("C + O2 -> CO + CO2").unwrap_err(), BalanceError::Unbalanced);
    }

    #[test]
    fn expand_resolves_nested_groups() {
        assert_eq!(expand_formula("Mg(NO3)2"), "MgN2O6");
        assert_eq!(expand_formula("((CH3)3C)2O"), "C6H18C2O");
    }

    #[test]
    fn expand_is_idempotent() {
        assert_eq!(expand_formula("C6H12O6"), "C6H12O6");
        let once = expand_formula("(NH4)2SO4");
        assert_eq!(expand_formula(&once), once);
    }

    #[test]
    fn expand_leaves_group_without_multiplier() {
        assert_eq!(expand_formula("Ca(OH)"), "Ca(OH)");
        // the leftover parenthesis then fails parsing
        assert!(matches!(
            Compound::from_formula("Ca(OH)").unwrap_err(),
            BalanceError::UnexpectedChar { ch: '(', .. },
        ));
    }

    #[test]
    fn composition_accumulates_repeated_symbols() {
        let compound = Compound::from_formula("((CH3)3C)2O").unwrap();
        assert_eq!(
            compound.composition(),
            &[(Element::C, 8), (Element::H, 18), (Element::O, 1)][..],
        );
    }

    #[test]
    fn tokenization_is_case_sensitive() {
        // "CO" is carbon plus oxygen, "Co" is cobalt
        let carbon_monoxide = Compound::from_formula("CO").unwrap();
        assert_eq!(
            carbon_monoxide.composition(),
            &[(Element::C, 1), (Element::O, 1)][..],
        );

        let cobalt = Compound::from_formula("Co").unwrap();
        assert_eq!(cobalt.composition(), &[(Element::Co, 1)][..]);
    }

    #[test]
    fn matrix_rows_follow_first_seen_element_order() {
        let equation = Equation::parse("CH4 + O2 -> CO2 + H2O").unwrap();
        let matrix = build_matrix(equation.reactants(), equation.products());
        // rows: C, H, O
        assert_eq!(
            matrix,
            vec![
                vec![1, 0, -1, 0],
                vec![4, 0, 0, -2],
                vec![0, 2, -2, -1],
            ],
        );
    }

    #[test]
    fn solver_rejects_inconsistent_system() {
        // H2 -> O2, rows H: [2, 0] and O: [0, -2]
        assert_eq!(solve_homogeneous(&[vec![2, 0], vec![0, -2]]), None);
    }

    #[test]
    fn solver_rejects_zero_column() {
        assert_eq!(solve_homogeneous(&[vec![0, 0]]), None);
        assert_eq!(solve_homogeneous(&[vec![2, 0], vec![1, 0]]), None);
    }

    #[test]
    fn solver_scales_fractional_solutions_to_integers() {
        // C2H6 + O2 -> CO2 + H2O needs even scaling: 2, 7, 4, 6
        let result = balance("C2H6 + O2 -> CO2 + H2O").unwrap();
        assert_eq!(result.coefficients, vec![2, 7, 4, 6]);
        assert_eq!(result.balanced, "2C2H6 + 7O2 -> 4CO2 + 6H2O");
    }
}
